//! Pipeline error taxonomy.
//!
//! Every variant is recoverable: a failing stage degrades to "log and
//! continue" so the periodic driver keeps running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Core token or market data could not be fetched. Aborts the pipeline
    /// for this candidate in this cycle.
    #[error("data fetch failed for {candidate}: {message}")]
    DataFetch { candidate: String, message: String },

    /// The candidate cannot currently be traded (graduated or locked).
    #[error("candidate {0} is not tradable")]
    NotTradable(String),

    /// Evaluator output did not match the vote schema. A fallback vote is
    /// substituted by the panel.
    #[error("analyzer output rejected: {0}")]
    AnalyzerParse(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("verification failed: {0}")]
    Verification(String),

    /// Buy rejected or failed. The vote result stays valid, no holding is
    /// created.
    #[error("trade execution failed for {candidate}: {message}")]
    TradeExecution { candidate: String, message: String },

    /// Price refresh or sell failed during an exit sweep. Retried next sweep.
    #[error("exit check failed for {candidate}: {message}")]
    ExitCheck { candidate: String, message: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Stable code used in audit events.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::DataFetch { .. } => "DATA_FETCH",
            PipelineError::NotTradable(_) => "NOT_TRADABLE",
            PipelineError::AnalyzerParse(_) => "ANALYZER_PARSE",
            PipelineError::Publish(_) => "PUBLISH",
            PipelineError::Verification(_) => "VERIFICATION",
            PipelineError::TradeExecution { .. } => "TRADE_EXECUTION",
            PipelineError::ExitCheck { .. } => "EXIT_CHECK",
            PipelineError::Store(_) => "STORE",
            PipelineError::Json(_) => "JSON",
        }
    }
}
