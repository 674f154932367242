use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::Instant;

use crate::config::RiskConfig;

const BUY_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Last check before a buy reaches the execution engine.
pub struct RiskGuard {
    config: RiskConfig,
    buy_timestamps: VecDeque<Instant>,
}

impl RiskGuard {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            buy_timestamps: VecDeque::new(),
        }
    }

    fn prune_buys(&mut self) {
        let now = Instant::now();
        while self
            .buy_timestamps
            .front()
            .is_some_and(|ts| now.duration_since(*ts) >= BUY_WINDOW)
        {
            self.buy_timestamps.pop_front();
        }
    }

    pub fn record_buy(&mut self) {
        self.prune_buys();
        self.buy_timestamps.push_back(Instant::now());
    }

    pub fn check_buy(&mut self, spend: f64, balance: f64, open_holdings: usize) -> Result<()> {
        if !(spend > 0.0) {
            bail!("spend must be positive");
        }

        self.prune_buys();
        if self.buy_timestamps.len() as u32 >= self.config.max_buys_per_hour {
            bail!(
                "buy throttle exceeded: {} >= {} per hour",
                self.buy_timestamps.len(),
                self.config.max_buys_per_hour
            );
        }

        if open_holdings >= self.config.max_open_holdings {
            bail!(
                "open holdings limit reached: {} >= {}",
                open_holdings,
                self.config.max_open_holdings
            );
        }

        if balance - spend < self.config.min_reserve {
            bail!(
                "min reserve breached: {} - {} < {}",
                balance,
                spend,
                self.config.min_reserve
            );
        }

        Ok(())
    }
}
