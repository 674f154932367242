//! Multi-identity publishing: per-identity cooldowns, challenge verification
//! and the HTTP client for the discussion board.

pub mod client;
pub mod rate_limit;
pub mod types;

pub use client::MoltbookClient;
pub use rate_limit::{IdentityRateLimiter, DEFAULT_REPLY_COOLDOWN, DEFAULT_THREAD_COOLDOWN};
pub use types::*;
