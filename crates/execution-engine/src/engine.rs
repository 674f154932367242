use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::types::{TradeError, TradeReceipt, TradingProvider};

/// Front for the trading backend that honors dry-run mode.
///
/// In dry-run mode buys and sells never reach the backend and return
/// [`TradeReceipt::dry_run`]. Reads still go to the backend when one is
/// configured.
pub struct ExecutionEngine {
    backend: Option<Arc<dyn TradingProvider>>,
    dry_run: bool,
    paper_balance: f64,
}

impl ExecutionEngine {
    pub fn new(backend: Arc<dyn TradingProvider>, dry_run: bool) -> Self {
        Self {
            backend: Some(backend),
            dry_run,
            paper_balance: 0.0,
        }
    }

    /// Dry-run engine with no backend: every token is tradable, progress is
    /// unknown and the balance is fixed.
    pub fn detached(paper_balance: f64) -> Self {
        Self {
            backend: None,
            dry_run: true,
            paper_balance,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn backend(&self) -> Result<&Arc<dyn TradingProvider>, TradeError> {
        self.backend.as_ref().ok_or(TradeError::Unavailable)
    }
}

#[async_trait]
impl TradingProvider for ExecutionEngine {
    async fn can_trade(&self, id: &str) -> Result<bool, TradeError> {
        match &self.backend {
            Some(backend) => backend.can_trade(id).await,
            None => Ok(true),
        }
    }

    async fn progress(&self, id: &str) -> Result<f64, TradeError> {
        self.backend()?.progress(id).await
    }

    async fn buy(&self, id: &str, amount: f64) -> Result<TradeReceipt, TradeError> {
        if !(amount > 0.0) {
            return Err(TradeError::Rejected(format!("invalid buy amount {}", amount)));
        }
        if self.dry_run {
            info!("[DRY RUN] Would buy {} with {} native", id, amount);
            return Ok(TradeReceipt::dry_run());
        }

        info!("EXECUTING buy {} for {} native", id, amount);
        match self.backend()?.buy(id, amount).await {
            Ok(receipt) => {
                info!("Buy filled: tx={} amount_out={}", receipt.tx_ref, receipt.amount_out);
                Ok(receipt)
            }
            Err(e) => {
                error!("Buy failed for {}: {}", id, e);
                Err(e)
            }
        }
    }

    async fn sell(&self, id: &str) -> Result<TradeReceipt, TradeError> {
        if self.dry_run {
            info!("[DRY RUN] Would sell all {}", id);
            return Ok(TradeReceipt::dry_run());
        }

        info!("EXECUTING sell of all {}", id);
        match self.backend()?.sell(id).await {
            Ok(receipt) => {
                info!("Sell filled: tx={} amount_out={}", receipt.tx_ref, receipt.amount_out);
                Ok(receipt)
            }
            Err(e) => {
                error!("Sell failed for {}: {}", id, e);
                Err(e)
            }
        }
    }

    async fn balance(&self) -> Result<f64, TradeError> {
        match &self.backend {
            Some(backend) => backend.balance().await,
            None => Ok(self.paper_balance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        trades: AtomicUsize,
    }

    #[async_trait]
    impl TradingProvider for CountingBackend {
        async fn can_trade(&self, _id: &str) -> Result<bool, TradeError> {
            Ok(false)
        }

        async fn progress(&self, _id: &str) -> Result<f64, TradeError> {
            Ok(42.0)
        }

        async fn buy(&self, _id: &str, amount: f64) -> Result<TradeReceipt, TradeError> {
            self.trades.fetch_add(1, Ordering::SeqCst);
            Ok(TradeReceipt {
                tx_ref: "0xbuy".into(),
                amount_out: amount * 1000.0,
            })
        }

        async fn sell(&self, _id: &str) -> Result<TradeReceipt, TradeError> {
            self.trades.fetch_add(1, Ordering::SeqCst);
            Err(TradeError::Rejected("no balance".into()))
        }

        async fn balance(&self) -> Result<f64, TradeError> {
            Ok(3.5)
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_reaches_backend() {
        let backend = Arc::new(CountingBackend::default());
        let engine = ExecutionEngine::new(backend.clone(), true);

        let bought = engine.buy("0xabc", 0.1).await.unwrap();
        let sold = engine.sell("0xabc").await.unwrap();
        assert!(bought.is_dry_run());
        assert_eq!(sold.tx_ref, "0xDRY_RUN");
        assert_eq!(backend.trades.load(Ordering::SeqCst), 0);

        // Reads still hit the backend.
        assert!(!engine.can_trade("0xabc").await.unwrap());
        assert_eq!(engine.progress("0xabc").await.unwrap(), 42.0);
    }

    #[tokio::test]
    async fn test_live_mode_forwards_trades() {
        let backend = Arc::new(CountingBackend::default());
        let engine = ExecutionEngine::new(backend.clone(), false);

        let receipt = engine.buy("0xabc", 0.1).await.unwrap();
        assert_eq!(receipt.tx_ref, "0xbuy");
        assert!(matches!(engine.sell("0xabc").await, Err(TradeError::Rejected(_))));
        assert_eq!(backend.trades.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let engine = ExecutionEngine::new(Arc::new(CountingBackend::default()), false);
        assert!(engine.buy("0xabc", 0.0).await.is_err());
        assert!(engine.buy("0xabc", f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_detached_engine() {
        let engine = ExecutionEngine::detached(5.0);
        assert!(engine.is_dry_run());
        assert!(engine.can_trade("0xabc").await.unwrap());
        assert!(matches!(engine.progress("0xabc").await, Err(TradeError::Unavailable)));
        assert_eq!(engine.balance().await.unwrap(), 5.0);
        assert!(engine.buy("0xabc", 0.1).await.unwrap().is_dry_run());
    }
}
