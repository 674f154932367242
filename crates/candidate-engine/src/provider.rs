use async_trait::async_trait;
use common::{AccountHolding, ActivityEntry, ChartCandle, TokenInfo, TokenMarket, TokenMetrics};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("token API error {status} for {path}: {body}")]
    Api {
        status: u16,
        path: String,
        body: String,
    },
    #[error("decode error for {path}: {message}")]
    Decode { path: String, message: String },
}

/// Read-only token data source. Info and market are required for analysis;
/// the other calls may fail independently.
#[async_trait]
pub trait TokenDataProvider: Send + Sync {
    async fn info(&self, id: &str) -> Result<TokenInfo, ProviderError>;

    async fn market(&self, id: &str) -> Result<TokenMarket, ProviderError>;

    async fn metrics(&self, id: &str, timeframe: &str) -> Result<TokenMetrics, ProviderError>;

    async fn chart(&self, id: &str) -> Result<Vec<ChartCandle>, ProviderError>;

    /// Accounts that recently traded the token, newest first.
    async fn recent_activity(&self, id: &str) -> Result<Vec<ActivityEntry>, ProviderError>;

    async fn holdings_of(&self, account: &str) -> Result<Vec<AccountHolding>, ProviderError>;
}
