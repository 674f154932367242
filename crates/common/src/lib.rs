//! Shared domain types and the pipeline error taxonomy for the syndicate bot.

pub mod error;
pub mod types;

pub use error::PipelineError;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
