//! Periodic summary posted to the board by the Alpha identity.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use common::{PipelineError, Result};
use decision_engine::Role;
use publish_client::{IdentityRateLimiter, Identity, PublishKind, PublishOutcome};
use serde_json::json;
use tracing::info;

use crate::journal::{record, AuditEvent, SharedJournal};
use crate::ledger::{HoldingLedger, PortfolioSummary};
use crate::store::{SqliteStore, StoreStats};

pub fn report_title(date: NaiveDate) -> String {
    format!("SYNDICATE REPORT - {}", date.format("%Y-%m-%d"))
}

fn score_or_na(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.2}/10", s))
        .unwrap_or_else(|| "N/A".into())
}

pub fn render_report(stats: &StoreStats, portfolio: &PortfolioSummary) -> String {
    let approval = if stats.analyzed > 0 {
        stats.invest as f64 / stats.analyzed as f64 * 100.0
    } else {
        0.0
    };
    [
        "PIPELINE".to_string(),
        format!("- Tokens discovered: {}", stats.discovered),
        format!("- Tokens analyzed: {}", stats.analyzed),
        format!("- INVEST: {} | PASS: {}", stats.invest, stats.pass),
        format!("- Approval rate: {:.1}%", approval),
        String::new(),
        "PORTFOLIO".to_string(),
        format!("- Active holdings: {}", stats.active_holdings),
        format!("- Closed positions: {}", portfolio.sold),
        format!("- Total invested: {:.4}", stats.total_invested),
        format!("- Current value: {:.4}", portfolio.current_value),
        format!("- P&L: {:+.2}%", portfolio.pnl_percent),
        format!("- Trades: {}", stats.trades),
        String::new(),
        "SCORES".to_string(),
        format!("- Highest: {}", score_or_na(stats.highest_score)),
        format!("- Lowest: {}", score_or_na(stats.lowest_score)),
    ]
    .join("\n")
}

#[derive(Debug)]
pub enum ReportOutcome {
    Published { thread_id: Option<String> },
    Skipped { retry_in_secs: u64 },
    /// No publisher configured; the report was only logged.
    LoggedOnly,
}

pub struct SummaryReport {
    store: Arc<SqliteStore>,
    ledger: Arc<HoldingLedger>,
    publisher: Option<Arc<IdentityRateLimiter>>,
    journal: SharedJournal,
}

impl SummaryReport {
    pub fn new(
        store: Arc<SqliteStore>,
        ledger: Arc<HoldingLedger>,
        publisher: Option<Arc<IdentityRateLimiter>>,
        journal: SharedJournal,
    ) -> Self {
        Self {
            store,
            ledger,
            publisher,
            journal,
        }
    }

    pub async fn publish(&self) -> Result<ReportOutcome> {
        let stats = self.store.stats()?;
        let portfolio = self.ledger.summary()?;
        let title = report_title(Utc::now().date_naive());
        let body = render_report(&stats, &portfolio);
        info!("{}\n{}", title, body);

        let outcome = match &self.publisher {
            None => ReportOutcome::LoggedOnly,
            Some(publisher) => {
                let kind = PublishKind::Thread {
                    title: title.clone(),
                };
                match publisher
                    .publish(&Identity::new(Role::Alpha.as_str()), kind, &body)
                    .await
                    .map_err(|e| PipelineError::Publish(e.to_string()))?
                {
                    PublishOutcome::Published(content) => ReportOutcome::Published {
                        thread_id: content.thread_id,
                    },
                    PublishOutcome::Skipped { retry_in } => ReportOutcome::Skipped {
                        retry_in_secs: retry_in.as_secs(),
                    },
                }
            }
        };

        record(
            &self.journal,
            AuditEvent::new("summary_report", title).payload(json!({
                "discovered": stats.discovered,
                "analyzed": stats.analyzed,
                "invest": stats.invest,
                "pass": stats.pass,
                "active_holdings": stats.active_holdings,
                "total_invested": stats.total_invested,
                "trades": stats.trades,
                "outcome": format!("{:?}", outcome),
            })),
        )
        .await;
        Ok(outcome)
    }
}
