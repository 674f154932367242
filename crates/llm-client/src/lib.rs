pub mod cache;
pub mod client;
pub mod types;

pub use cache::{cache_key, CachedGenerator, GenerationCache, MemoryCache};
pub use client::{AnthropicClient, FallbackChain, OpenAiClient};
pub use types::{Generation, LlmError, TextGenerator};
