use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Transaction reference returned for trades skipped in dry-run mode.
pub const DRY_RUN_TX: &str = "0xDRY_RUN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub tx_ref: String,
    /// Tokens received on a buy, native amount received on a sell.
    pub amount_out: f64,
}

impl TradeReceipt {
    pub fn dry_run() -> Self {
        Self {
            tx_ref: DRY_RUN_TX.to_string(),
            amount_out: 0.0,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.tx_ref == DRY_RUN_TX
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("relay error {status}: {body}")]
    Relay { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("trade rejected: {0}")]
    Rejected(String),
    #[error("no trading backend configured")]
    Unavailable,
}

/// Bonding-curve trading backend for a single wallet.
#[async_trait]
pub trait TradingProvider: Send + Sync {
    /// False once the token graduated or its curve is locked.
    async fn can_trade(&self, id: &str) -> Result<bool, TradeError>;

    /// Bonding-curve completion in percent.
    async fn progress(&self, id: &str) -> Result<f64, TradeError>;

    /// Spends `amount` of the native asset on `id`.
    async fn buy(&self, id: &str, amount: f64) -> Result<TradeReceipt, TradeError>;

    /// Sells the wallet's entire balance of `id`.
    async fn sell(&self, id: &str) -> Result<TradeReceipt, TradeError>;

    /// Native balance of the trading wallet.
    async fn balance(&self) -> Result<f64, TradeError>;
}
