//! Open-position monitor: refreshes prices, tracks P&L and sells on
//! take-profit or stop-loss.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use candidate_engine::TokenDataProvider;
use common::{Holding, HoldingStatus, PipelineError, Result};
use execution_engine::TradingProvider;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::journal::{record, AuditEvent, SharedJournal};
use crate::store::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitPolicy {
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
}

impl ExitPolicy {
    pub fn from_config(risk: &RiskConfig) -> Self {
        Self {
            take_profit_percent: risk.take_profit_percent,
            stop_loss_percent: risk.stop_loss_percent,
        }
    }

    pub fn check(&self, pnl_percent: f64) -> Option<ExitReason> {
        if pnl_percent >= self.take_profit_percent {
            Some(ExitReason::TakeProfit)
        } else if pnl_percent <= -self.stop_loss_percent {
            Some(ExitReason::StopLoss)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub checked: usize,
    pub priced: usize,
    pub anchored: usize,
    pub sold: Vec<(String, ExitReason)>,
    pub errors: Vec<PipelineError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioSummary {
    pub active: usize,
    pub sold: usize,
    pub invested: f64,
    pub current_value: f64,
    pub pnl_percent: f64,
}

fn current_value(holding: &Holding) -> f64 {
    match holding.status {
        HoldingStatus::Sold => {
            holding.entry_spend * (1.0 + holding.pnl_percent.unwrap_or(0.0) / 100.0)
        }
        _ => match holding.last_price {
            Some(price) if holding.entry_price > 0.0 => {
                holding.entry_spend * price / holding.entry_price
            }
            _ => holding.entry_spend,
        },
    }
}

pub struct HoldingLedger {
    tokens: Arc<dyn TokenDataProvider>,
    trading: Arc<dyn TradingProvider>,
    store: Arc<SqliteStore>,
    journal: SharedJournal,
    policy: ExitPolicy,
    /// Sells that went through but could not be written to the store, keyed
    /// by candidate id with the exit tx. Retried before anything else.
    unrecorded_sells: Mutex<HashMap<String, String>>,
}

impl HoldingLedger {
    pub fn new(
        tokens: Arc<dyn TokenDataProvider>,
        trading: Arc<dyn TradingProvider>,
        store: Arc<SqliteStore>,
        journal: SharedJournal,
        policy: ExitPolicy,
    ) -> Self {
        Self {
            tokens,
            trading,
            store,
            journal,
            policy,
            unrecorded_sells: Mutex::new(HashMap::new()),
        }
    }

    fn unrecorded(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.unrecorded_sells.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One pass over every open holding. A holding whose price or sale fails
    /// stays open for the next sweep. Store errors are reported per holding
    /// and never stop the pass.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let holdings = self.store.active_holdings()?;
        let mut report = SweepReport::default();

        for holding in holdings {
            report.checked += 1;
            let id = holding.candidate_id.clone();
            let exit_err = |message: String| PipelineError::ExitCheck {
                candidate: id.clone(),
                message,
            };

            let pending_tx = self.unrecorded().get(&id).cloned();
            if let Some(tx) = pending_tx {
                match self.store.mark_sold(&id, &tx) {
                    Ok(_) => {
                        info!("Recorded earlier sale of {} ({})", holding.symbol, tx);
                        self.unrecorded().remove(&id);
                    }
                    Err(e) => {
                        warn!("Still cannot record sale of {}: {}", holding.symbol, e);
                        report.errors.push(exit_err(e.to_string()));
                    }
                }
                continue;
            }

            let price = match self.tokens.market(&id).await {
                Ok(market) => market.price.filter(|p| *p > 0.0),
                Err(e) => {
                    warn!("Price refresh failed for {}: {}", holding.symbol, e);
                    report.errors.push(exit_err(e.to_string()));
                    continue;
                }
            };
            let Some(price) = price else {
                debug!("No price for {}, skipping", holding.symbol);
                continue;
            };
            report.priced += 1;

            if holding.entry_price <= 0.0 {
                if let Err(e) = self.store.update_entry_price(&id, price) {
                    warn!("Entry price update failed for {}: {}", holding.symbol, e);
                    report.errors.push(exit_err(e.to_string()));
                    continue;
                }
                report.anchored += 1;
                info!("Anchored entry price of {} at {}", holding.symbol, price);
                record(
                    &self.journal,
                    AuditEvent::new("entry_anchored", format!("entry price set to {}", price))
                        .candidate(id.clone()),
                )
                .await;
                continue;
            }

            let Some(pnl) = holding.pnl_percent_at(price) else {
                continue;
            };
            if let Err(e) = self.store.update_price(&id, price, pnl) {
                warn!("Price update failed for {}: {}", holding.symbol, e);
                report.errors.push(exit_err(e.to_string()));
            }
            debug!("{} at {} ({:+.2}%)", holding.symbol, price, pnl);

            let Some(reason) = self.policy.check(pnl) else {
                continue;
            };
            info!(
                "{} hit {} at {:+.2}%, selling",
                holding.symbol,
                reason.as_str(),
                pnl
            );

            match self.trading.sell(&id).await {
                Ok(receipt) => {
                    let recorded = match self.store.mark_sold(&id, &receipt.tx_ref) {
                        Ok(changed) => {
                            if changed {
                                report.sold.push((id.clone(), reason));
                            }
                            true
                        }
                        Err(e) => {
                            warn!(
                                "Sold {} ({}) but could not record it: {}",
                                holding.symbol, receipt.tx_ref, e
                            );
                            self.unrecorded()
                                .insert(id.clone(), receipt.tx_ref.clone());
                            report.errors.push(exit_err(e.to_string()));
                            false
                        }
                    };
                    record(
                        &self.journal,
                        AuditEvent::new("holding_sold", reason.as_str())
                            .candidate(id.clone())
                            .payload(json!({
                                "tx": receipt.tx_ref,
                                "price": price,
                                "pnl_percent": pnl,
                                "amount_out": receipt.amount_out,
                                "recorded": recorded,
                            })),
                    )
                    .await;
                }
                Err(e) => {
                    warn!("Sell failed for {}: {}", holding.symbol, e);
                    record(
                        &self.journal,
                        AuditEvent::new("sell_failed", e.to_string())
                            .candidate(id.clone())
                            .payload(json!({ "reason": reason.as_str(), "pnl_percent": pnl })),
                    )
                    .await;
                    report.errors.push(exit_err(e.to_string()));
                }
            }
        }

        Ok(report)
    }

    pub fn summary(&self) -> Result<PortfolioSummary> {
        let holdings = self.store.all_holdings()?;
        let invested: f64 = holdings.iter().map(|h| h.entry_spend).sum();
        let current: f64 = holdings.iter().map(current_value).sum();
        Ok(PortfolioSummary {
            active: holdings
                .iter()
                .filter(|h| h.status == HoldingStatus::Holding)
                .count(),
            sold: holdings
                .iter()
                .filter(|h| h.status == HoldingStatus::Sold)
                .count(),
            invested,
            current_value: current,
            pnl_percent: if invested > 0.0 {
                (current - invested) / invested * 100.0
            } else {
                0.0
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::read_events;
    use crate::testing::{memory_store, temp_journal, FakeTokens, FakeTrading};
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    const POLICY: ExitPolicy = ExitPolicy {
        take_profit_percent: 50.0,
        stop_loss_percent: 30.0,
    };

    fn holding(id: &str, entry_price: f64) -> Holding {
        Holding {
            candidate_id: id.into(),
            name: "Claw".into(),
            symbol: "CLAW".into(),
            amount: 1000.0,
            entry_spend: 0.1,
            entry_price,
            entry_tx: "0xbuy".into(),
            exit_tx: None,
            status: HoldingStatus::Holding,
            last_price: None,
            pnl_percent: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    struct Setup {
        ledger: HoldingLedger,
        tokens: Arc<FakeTokens>,
        trading: Arc<FakeTrading>,
        store: Arc<SqliteStore>,
        journal: SharedJournal,
        _tmp: tempfile::TempDir,
    }

    fn setup() -> Setup {
        let tokens = FakeTokens::new();
        let trading = FakeTrading::new(1.0);
        let store = memory_store();
        let (tmp, journal) = temp_journal();
        let ledger = HoldingLedger::new(
            tokens.clone(),
            trading.clone(),
            store.clone(),
            journal.clone(),
            POLICY,
        );
        Setup {
            ledger,
            tokens,
            trading,
            store,
            journal,
            _tmp: tmp,
        }
    }

    #[test]
    fn test_exit_policy_bounds() {
        assert_eq!(POLICY.check(50.0), Some(ExitReason::TakeProfit));
        assert_eq!(POLICY.check(-30.0), Some(ExitReason::StopLoss));
        assert_eq!(POLICY.check(49.9), None);
        assert_eq!(POLICY.check(-29.9), None);
    }

    #[tokio::test]
    async fn test_take_profit_sells_exactly_once() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 1.0)).unwrap();
        s.tokens.add("0xaa", Some(1.6), false);

        let report = s.ledger.sweep().await.unwrap();
        assert_eq!(report.sold, vec![("0xaa".to_string(), ExitReason::TakeProfit)]);

        let again = s.ledger.sweep().await.unwrap();
        assert_eq!(again.checked, 0);
        assert_eq!(s.trading.sells.load(Ordering::SeqCst), 1);

        let sold = s.store.holding("0xaa").unwrap().unwrap();
        assert_eq!(sold.status, HoldingStatus::Sold);
        assert_eq!(sold.exit_tx.as_deref(), Some("0xsell1"));
    }

    #[tokio::test]
    async fn test_stop_loss_sells() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 1.0)).unwrap();
        s.tokens.add("0xaa", Some(0.69), false);

        let report = s.ledger.sweep().await.unwrap();
        assert_eq!(report.sold[0].1, ExitReason::StopLoss);
    }

    #[tokio::test]
    async fn test_within_band_only_updates_price() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 1.0)).unwrap();
        s.tokens.add("0xaa", Some(1.2), false);

        let report = s.ledger.sweep().await.unwrap();
        assert!(report.sold.is_empty());
        let h = s.store.holding("0xaa").unwrap().unwrap();
        assert_eq!(h.status, HoldingStatus::Holding);
        assert_eq!(h.last_price, Some(1.2));
        assert!((h.pnl_percent.unwrap() - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_sell_stays_open() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 1.0)).unwrap();
        s.tokens.add("0xaa", Some(2.0), false);
        s.trading.fail_sells.store(true, Ordering::SeqCst);

        let report = s.ledger.sweep().await.unwrap();
        assert!(report.sold.is_empty());
        assert!(matches!(report.errors[0], PipelineError::ExitCheck { .. }));
        assert_eq!(s.store.active_holdings().unwrap().len(), 1);

        s.trading.fail_sells.store(false, Ordering::SeqCst);
        assert_eq!(s.ledger.sweep().await.unwrap().sold.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_price_is_skipped() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 1.0)).unwrap();
        s.tokens.add("0xaa", None, false);

        let report = s.ledger.sweep().await.unwrap();
        assert_eq!((report.checked, report.priced), (1, 0));
        assert_eq!(s.trading.sells.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_entry_price_is_anchored() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 0.0)).unwrap();
        s.tokens.add("0xaa", Some(5.0), false);

        let report = s.ledger.sweep().await.unwrap();
        assert_eq!(report.anchored, 1);
        assert!(report.sold.is_empty());
        assert_eq!(s.store.holding("0xaa").unwrap().unwrap().entry_price, 5.0);

        // Measured from the anchor on the next pass.
        s.tokens.set_price("0xaa", Some(7.5));
        assert_eq!(s.ledger.sweep().await.unwrap().sold.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_on_one_holding_does_not_stop_sweep() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 1.0)).unwrap();
        s.store.insert_holding(&holding("0xbb", 1.0)).unwrap();
        s.tokens.add("0xaa", Some(1.2), false);
        s.tokens.add("0xbb", Some(1.6), false);
        s.store
            .execute_batch(
                "CREATE TRIGGER reject_price BEFORE UPDATE OF last_price ON holdings
                 WHEN NEW.candidate_id = '0xaa'
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();

        let report = s.ledger.sweep().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            PipelineError::ExitCheck { candidate, .. } if candidate == "0xaa"
        ));
        assert_eq!(report.sold, vec![("0xbb".to_string(), ExitReason::TakeProfit)]);
    }

    #[tokio::test]
    async fn test_unrecorded_sale_is_never_sold_twice() {
        let s = setup();
        s.store.insert_holding(&holding("0xaa", 1.0)).unwrap();
        s.store.insert_holding(&holding("0xbb", 1.0)).unwrap();
        s.tokens.add("0xaa", Some(1.6), false);
        s.tokens.add("0xbb", Some(0.5), false);
        s.store
            .execute_batch(
                "CREATE TRIGGER reject_sold BEFORE UPDATE OF status ON holdings
                 WHEN NEW.candidate_id = '0xaa'
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();

        let report = s.ledger.sweep().await.unwrap();
        assert_eq!(s.trading.sells.load(Ordering::SeqCst), 2);
        assert_eq!(report.sold, vec![("0xbb".to_string(), ExitReason::StopLoss)]);
        assert_eq!(report.errors.len(), 1);

        let events = read_events(&*s.journal.lock().await);
        let sold: Vec<_> = events
            .iter()
            .filter(|e| e["kind"] == "holding_sold" && e["candidate"] == "0xaa")
            .collect();
        assert_eq!(sold.len(), 1);
        assert_eq!(sold[0]["payload"]["recorded"], false);

        // Still failing: reported again, no second sell.
        let again = s.ledger.sweep().await.unwrap();
        assert_eq!(again.errors.len(), 1);
        assert_eq!(s.trading.sells.load(Ordering::SeqCst), 2);

        s.store.execute_batch("DROP TRIGGER reject_sold;").unwrap();
        let healed = s.ledger.sweep().await.unwrap();
        assert!(healed.errors.is_empty());
        assert_eq!(s.trading.sells.load(Ordering::SeqCst), 2);
        assert_eq!(
            s.store.holding("0xaa").unwrap().unwrap().status,
            HoldingStatus::Sold
        );
        assert!(s.store.active_holdings().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary() {
        let s = setup();
        let mut open = holding("0xaa", 1.0);
        open.last_price = Some(1.5);
        s.store.insert_holding(&open).unwrap();
        s.store.insert_holding(&holding("0xbb", 1.0)).unwrap();
        s.store.update_price("0xbb", 0.5, -50.0).unwrap();
        s.store.mark_sold("0xbb", "0xsell").unwrap();

        let summary = s.ledger.summary().unwrap();
        assert_eq!((summary.active, summary.sold), (1, 1));
        assert!((summary.invested - 0.2).abs() < 1e-9);
        // 0.15 open + 0.05 realized
        assert!((summary.current_value - 0.2).abs() < 1e-9);
        assert!(summary.pnl_percent.abs() < 1e-6);
    }
}
