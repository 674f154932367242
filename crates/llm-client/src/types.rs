use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Raw text produced for one (instructions, input) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    /// Model that produced the text, or "cache".
    pub model: String,
    pub cached: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Timeout")]
    Timeout,
    #[error("response carried no text content")]
    EmptyResponse,
    #[error("no generation provider available: {0}")]
    Unavailable(String),
}

/// Language-generation provider.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short provider label used in logs.
    fn name(&self) -> &str;

    async fn generate(&self, instructions: &str, input: &str) -> Result<Generation, LlmError>;
}
