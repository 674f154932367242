//! Per-candidate pipeline: gather data, run the panel, debate, vote and
//! optionally buy. Every transition lands in the audit journal.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use candidate_engine::{CandidateRegistry, TokenDataProvider};
use chrono::Utc;
use common::{Candidate, Holding, HoldingStatus, PipelineError, TokenMarket, TokenMetrics};
use decision_engine::{
    format_result, Decision, Dossier, EvaluationVote, EvaluatorPanel, Role, VoteAggregator,
    VoteResult,
};
use execution_engine::TradingProvider;
use publish_client::{IdentityRateLimiter, Identity, PublishKind, PublishOutcome};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::journal::{record, AuditEvent, SharedJournal};
use crate::risk::RiskGuard;
use crate::store::SqliteStore;

// ── State machine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Discovered,
    DataGathered,
    Analyzed,
    Debated,
    Voted,
    TradeExecuted,
    Holding,
    Passed,
    Aborted,
    TradeFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal pipeline transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Discovered => "discovered",
            PipelineStage::DataGathered => "data_gathered",
            PipelineStage::Analyzed => "analyzed",
            PipelineStage::Debated => "debated",
            PipelineStage::Voted => "voted",
            PipelineStage::TradeExecuted => "trade_executed",
            PipelineStage::Holding => "holding",
            PipelineStage::Passed => "passed",
            PipelineStage::Aborted => "aborted",
            PipelineStage::TradeFailed => "trade_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Holding
                | PipelineStage::Passed
                | PipelineStage::Aborted
                | PipelineStage::TradeFailed
        )
    }

    pub fn advance(self, next: PipelineStage) -> Result<PipelineStage, IllegalTransition> {
        use PipelineStage as S;
        let legal = matches!(
            (self, next),
            (S::Discovered, S::DataGathered)
                | (S::Discovered, S::Aborted)
                | (S::DataGathered, S::Analyzed)
                | (S::DataGathered, S::Aborted)
                | (S::Analyzed, S::Debated)
                | (S::Debated, S::Voted)
                | (S::Voted, S::Passed)
                | (S::Voted, S::TradeExecuted)
                | (S::Voted, S::TradeFailed)
                | (S::TradeExecuted, S::Holding)
        );
        if legal {
            Ok(next)
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub buy_amount: f64,
    pub metrics_timeframe: String,
    pub debate_enabled: bool,
    pub anchor_thread_id: String,
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            buy_amount: cfg.trading.buy_amount,
            metrics_timeframe: cfg.network.metrics_timeframe.clone(),
            debate_enabled: cfg.debate.enabled,
            anchor_thread_id: cfg.debate.anchor_thread_id.clone(),
        }
    }
}

pub struct PipelineDeps {
    pub registry: Arc<CandidateRegistry>,
    pub tokens: Arc<dyn TokenDataProvider>,
    pub trading: Arc<dyn TradingProvider>,
    pub panel: EvaluatorPanel,
    pub aggregator: VoteAggregator,
    /// None when publishing is disabled or no identity has credentials.
    pub publisher: Option<Arc<IdentityRateLimiter>>,
    pub store: Arc<SqliteStore>,
    pub journal: SharedJournal,
    pub risk: RiskGuard,
}

/// Where one candidate's run ended.
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: String,
    pub candidate_id: String,
    pub stage: PipelineStage,
    pub result: Option<VoteResult>,
    pub holding: Option<Holding>,
    pub error: Option<PipelineError>,
}

#[derive(Debug, Default)]
struct DebateSummary {
    thread_id: Option<String>,
    used_anchor: bool,
    posts: usize,
    failures: usize,
}

pub struct PipelineOrchestrator {
    registry: Arc<CandidateRegistry>,
    tokens: Arc<dyn TokenDataProvider>,
    trading: Arc<dyn TradingProvider>,
    panel: EvaluatorPanel,
    aggregator: VoteAggregator,
    publisher: Option<Arc<IdentityRateLimiter>>,
    store: Arc<SqliteStore>,
    journal: SharedJournal,
    risk: Mutex<RiskGuard>,
    settings: PipelineSettings,
}

fn identity(role: Role) -> Identity {
    Identity::new(role.as_str())
}

pub fn thread_title(candidate: &Candidate) -> String {
    format!("Token Analysis: {} (${})", candidate.name, candidate.symbol)
}

pub fn thread_body(role: Role, vote: &EvaluationVote) -> String {
    format!(
        "{}'s Opening Analysis:\n\nScore: {}/10 | Vote: {} | Confidence: {}%\n\n{}",
        role.label(),
        vote.score,
        vote.vote.as_str(),
        vote.confidence,
        vote.rationale
    )
}

pub fn reply_body(role: Role, candidate: &Candidate, vote: &EvaluationVote) -> String {
    format!(
        "{} on {} (${}):\n\nScore: {}/10 | Vote: {} | Confidence: {}%\n\n{}",
        role.label(),
        candidate.name,
        candidate.symbol,
        vote.score,
        vote.vote.as_str(),
        vote.confidence,
        vote.rationale
    )
}

impl PipelineOrchestrator {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            registry: deps.registry,
            tokens: deps.tokens,
            trading: deps.trading,
            panel: deps.panel,
            aggregator: deps.aggregator,
            publisher: deps.publisher,
            store: deps.store,
            journal: deps.journal,
            risk: Mutex::new(deps.risk),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<CandidateRegistry> {
        &self.registry
    }

    /// Discovers the unseen ids among `ids` and runs the pipeline on each.
    pub async fn process(&self, ids: &[String]) -> Vec<PipelineRun> {
        let candidates = self.registry.discover(ids).await;
        let mut runs = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            runs.push(self.run(candidate).await);
        }
        runs
    }

    #[instrument(skip(self, candidate), fields(candidate = %candidate.id))]
    pub async fn run(&self, candidate: Candidate) -> PipelineRun {
        let mut run = PipelineRun {
            run_id: Uuid::new_v4().to_string(),
            candidate_id: candidate.id.clone(),
            stage: PipelineStage::Discovered,
            result: None,
            holding: None,
            error: None,
        };
        if let Err(e) = self.store.record_discovered(&candidate) {
            warn!("Could not persist discovery of {}: {}", candidate.id, e);
        }
        self.event(
            &run,
            "pipeline_start",
            format!("{} (${})", candidate.name, candidate.symbol),
            Some(json!({ "name": candidate.name, "symbol": candidate.symbol })),
        )
        .await;

        // DataGathered
        let dossier = match self.gather(&candidate).await {
            Ok(dossier) => dossier,
            Err(e) => {
                warn!("Aborting {}: {}", candidate.id, e);
                if let Err(store_err) = self.store.mark_aborted(&candidate.id, e.code()) {
                    warn!("Could not persist abort of {}: {}", candidate.id, store_err);
                }
                self.enter(
                    &mut run,
                    PipelineStage::Aborted,
                    e.to_string(),
                    Some(json!({ "code": e.code() })),
                )
                .await;
                run.error = Some(e);
                return run;
            }
        };
        let candidate = dossier.candidate.clone();
        self.enter(
            &mut run,
            PipelineStage::DataGathered,
            "market data gathered".into(),
            Some(json!({
                "price": dossier.market.price,
                "market_cap": dossier.market.market_cap,
                "candles": dossier.chart.len(),
                "progress": dossier.progress,
            })),
        )
        .await;

        // Analyzed
        let outcomes = self.panel.analyze(&dossier).await;
        let fallbacks: Vec<&str> = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_fallback())
            .map(|(role, _)| role.as_str())
            .collect();
        self.enter(
            &mut run,
            PipelineStage::Analyzed,
            format!("{} votes, {} fallback", outcomes.len(), fallbacks.len()),
            Some(json!({ "fallback_roles": fallbacks })),
        )
        .await;
        let votes: BTreeMap<Role, EvaluationVote> = outcomes
            .into_iter()
            .map(|(role, outcome)| (role, outcome.into_vote()))
            .collect();

        // Debated
        let debate = self.debate(&candidate, &votes).await;
        self.enter(
            &mut run,
            PipelineStage::Debated,
            format!("{} posts published", debate.posts),
            Some(json!({
                "thread_id": debate.thread_id,
                "used_anchor": debate.used_anchor,
                "posts": debate.posts,
                "failures": debate.failures,
            })),
        )
        .await;

        // Voted
        let result = self.aggregator.evaluate(&candidate, &votes);
        info!("\n{}", format_result(&result));
        if let Err(e) = self.store.save_vote_result(&result) {
            error!("Could not persist vote for {}: {}", candidate.id, e);
        }
        if let Err(e) = self.store.mark_analyzed(&candidate.id) {
            warn!("Could not mark {} analyzed: {}", candidate.id, e);
        }
        self.enter(
            &mut run,
            PipelineStage::Voted,
            format!(
                "{} at {:.2} ({} YES)",
                result.decision.as_str(),
                result.weighted_score,
                result.yes_count
            ),
            Some(serde_json::to_value(&result).unwrap_or(Value::Null)),
        )
        .await;

        if result.decision == Decision::Pass {
            self.enter(&mut run, PipelineStage::Passed, "no trade".into(), None)
                .await;
            run.result = Some(result);
            return run;
        }

        // TradeExecuted
        match self.execute_buy(&candidate, &dossier.market).await {
            Ok(holding) => {
                self.enter(
                    &mut run,
                    PipelineStage::TradeExecuted,
                    format!("bought with {}", holding.entry_spend),
                    Some(json!({
                        "tx": holding.entry_tx,
                        "amount": holding.amount,
                        "entry_price": holding.entry_price,
                    })),
                )
                .await;
                match self.store.insert_holding(&holding) {
                    Ok(()) => {
                        self.enter(&mut run, PipelineStage::Holding, "holding opened".into(), None)
                            .await;
                    }
                    Err(e) => {
                        error!("Bought {} but could not persist holding: {}", candidate.id, e);
                        self.event(&run, "holding_persist_failed", e.to_string(), None)
                            .await;
                        run.error = Some(e);
                    }
                }
                run.holding = Some(holding);
            }
            Err(e) => {
                warn!("Trade failed for {}: {}", candidate.id, e);
                self.enter(
                    &mut run,
                    PipelineStage::TradeFailed,
                    e.to_string(),
                    Some(json!({ "code": e.code() })),
                )
                .await;
                run.error = Some(e);
            }
        }
        run.result = Some(result);
        run
    }

    async fn enter(
        &self,
        run: &mut PipelineRun,
        next: PipelineStage,
        message: String,
        payload: Option<Value>,
    ) {
        match run.stage.advance(next) {
            Ok(stage) => run.stage = stage,
            Err(e) => error!("{}: {}", run.candidate_id, e),
        }
        if run.stage.is_terminal() {
            info!("{} finished at {}", run.candidate_id, run.stage);
        } else {
            debug!("{} -> {}", run.candidate_id, run.stage);
        }
        self.event(run, "pipeline_stage", message, payload).await;
    }

    async fn event(&self, run: &PipelineRun, kind: &str, message: String, payload: Option<Value>) {
        let mut event = AuditEvent::new(kind, message)
            .stage(run.stage.as_str())
            .candidate(run.candidate_id.clone())
            .run(run.run_id.clone());
        if let Some(payload) = payload {
            event = event.payload(payload);
        }
        record(&self.journal, event).await;
    }

    async fn gather(&self, candidate: &Candidate) -> Result<Dossier, PipelineError> {
        let id = candidate.id.as_str();
        let fetch_err = |message: String| PipelineError::DataFetch {
            candidate: id.to_string(),
            message,
        };

        let (info, market) = tokio::join!(self.tokens.info(id), self.tokens.market(id));
        let info = info.map_err(|e| fetch_err(e.to_string()))?;
        let market: TokenMarket = market.map_err(|e| fetch_err(e.to_string()))?;
        if info.graduated {
            return Err(PipelineError::NotTradable(id.to_string()));
        }

        let metrics = match self.tokens.metrics(id, &self.settings.metrics_timeframe).await {
            Ok(metrics) => metrics,
            Err(e) => {
                debug!("Metrics unavailable for {}: {}", id, e);
                TokenMetrics::empty(id, &self.settings.metrics_timeframe)
            }
        };
        let chart = self.tokens.chart(id).await.unwrap_or_else(|e| {
            debug!("Chart unavailable for {}: {}", id, e);
            Vec::new()
        });

        match self.trading.can_trade(id).await {
            Ok(false) => return Err(PipelineError::NotTradable(id.to_string())),
            Ok(true) => {}
            Err(e) => warn!("Tradability check failed for {}, continuing: {}", id, e),
        }
        let progress = match self.trading.progress(id).await {
            Ok(progress) => Some(progress),
            Err(e) => {
                debug!("Curve progress unavailable for {}: {}", id, e);
                None
            }
        };

        let mut refreshed = Candidate::from_info(&info, candidate.discovered_at);
        refreshed.id = candidate.id.clone();
        Ok(Dossier {
            candidate: refreshed,
            market,
            metrics,
            chart,
            progress,
        })
    }

    /// Best effort. Alpha opens a thread and the others reply under it; if
    /// the thread cannot be opened every persona replies on the anchor thread.
    async fn debate(
        &self,
        candidate: &Candidate,
        votes: &BTreeMap<Role, EvaluationVote>,
    ) -> DebateSummary {
        let mut summary = DebateSummary::default();
        let Some(publisher) = self.publisher.as_ref().filter(|_| self.settings.debate_enabled)
        else {
            debug!("Debate skipped for {}: publishing disabled", candidate.id);
            return summary;
        };

        let opened = match votes.get(&Role::Alpha) {
            Some(vote) => {
                let kind = PublishKind::Thread {
                    title: thread_title(candidate),
                };
                match publisher
                    .publish(&identity(Role::Alpha), kind, &thread_body(Role::Alpha, vote))
                    .await
                {
                    Ok(PublishOutcome::Published(content)) => content.thread_id,
                    Ok(PublishOutcome::Skipped { retry_in }) => {
                        info!(
                            "Debate thread for {} skipped ({}s cooldown), using anchor",
                            candidate.symbol,
                            retry_in.as_secs()
                        );
                        None
                    }
                    Err(e) => {
                        warn!("Debate thread for {} failed: {}", candidate.symbol, e);
                        summary.failures += 1;
                        None
                    }
                }
            }
            None => None,
        };

        let (thread_id, repliers): (String, Vec<Role>) = match opened {
            Some(thread_id) => {
                summary.posts += 1;
                let others = Role::ALL.into_iter().filter(|r| *r != Role::Alpha).collect();
                (thread_id, others)
            }
            None => {
                summary.used_anchor = true;
                (self.settings.anchor_thread_id.clone(), Role::ALL.to_vec())
            }
        };

        for role in &repliers {
            let Some(vote) = votes.get(role) else {
                continue;
            };
            let kind = PublishKind::Reply {
                thread_id: thread_id.clone(),
                parent_id: None,
            };
            match publisher
                .publish(&identity(*role), kind, &reply_body(*role, candidate, vote))
                .await
            {
                Ok(PublishOutcome::Published(_)) => summary.posts += 1,
                Ok(PublishOutcome::Skipped { .. }) => {}
                Err(e) => {
                    warn!("{} reply on {} failed: {}", role.label(), thread_id, e);
                    summary.failures += 1;
                }
            }
        }

        summary.thread_id = Some(thread_id);
        summary
    }

    async fn execute_buy(
        &self,
        candidate: &Candidate,
        market: &TokenMarket,
    ) -> Result<Holding, PipelineError> {
        let trade_err = |message: String| PipelineError::TradeExecution {
            candidate: candidate.id.clone(),
            message,
        };
        let spend = self.settings.buy_amount;

        let balance = self
            .trading
            .balance()
            .await
            .map_err(|e| trade_err(format!("balance unavailable: {}", e)))?;
        let open_holdings = self.store.active_holdings()?.len();

        let mut risk = self.risk.lock().await;
        risk.check_buy(spend, balance, open_holdings)
            .map_err(|e| trade_err(e.to_string()))?;

        let receipt = self
            .trading
            .buy(&candidate.id, spend)
            .await
            .map_err(|e| trade_err(e.to_string()))?;
        risk.record_buy();
        drop(risk);

        // Prefer the fill price; fall back to the quoted price. Zero is
        // anchored on the first exit sweep.
        let entry_price = if receipt.amount_out > 0.0 {
            spend / receipt.amount_out
        } else {
            market.price.filter(|p| *p > 0.0).unwrap_or(0.0)
        };

        info!(
            "Bought {} (${}) for {} native, tx={}",
            candidate.name, candidate.symbol, spend, receipt.tx_ref
        );
        Ok(Holding {
            candidate_id: candidate.id.clone(),
            name: candidate.name.clone(),
            symbol: candidate.symbol.clone(),
            amount: receipt.amount_out,
            entry_spend: spend,
            entry_price,
            entry_tx: receipt.tx_ref,
            exit_tx: None,
            status: HoldingStatus::Holding,
            last_price: None,
            pnl_percent: None,
            opened_at: Utc::now(),
            closed_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::journal::read_events;
    use crate::store::CandidateStatus;
    use crate::testing::{
        memory_store, temp_journal, FakeBoard, FakeTokens, FakeTrading, FixedGenerator,
    };
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Harness {
        orchestrator: PipelineOrchestrator,
        tokens: Arc<FakeTokens>,
        trading: Arc<FakeTrading>,
        board: Arc<FakeBoard>,
        store: Arc<SqliteStore>,
        journal: SharedJournal,
        _tmp: tempfile::TempDir,
    }

    fn risk_config() -> RiskConfig {
        RiskConfig {
            take_profit_percent: 50.0,
            stop_loss_percent: 30.0,
            min_reserve: 0.05,
            max_open_holdings: 5,
            max_buys_per_hour: 5,
        }
    }

    fn harness(generator: Arc<FixedGenerator>, with_board: bool) -> Harness {
        let tokens = FakeTokens::new();
        let trading = FakeTrading::new(1.0);
        let board = FakeBoard::new();
        let store = memory_store();
        let (tmp, journal) = temp_journal();
        let publisher = with_board.then(|| {
            Arc::new(IdentityRateLimiter::with_cooldowns(
                board.clone(),
                Duration::from_secs(7200),
                Duration::ZERO,
            ))
        });

        let orchestrator = PipelineOrchestrator::new(
            PipelineDeps {
                registry: Arc::new(CandidateRegistry::new(tokens.clone())),
                tokens: tokens.clone(),
                trading: trading.clone(),
                panel: EvaluatorPanel::new(generator),
                aggregator: VoteAggregator::default(),
                publisher,
                store: store.clone(),
                journal: journal.clone(),
                risk: RiskGuard::new(risk_config()),
            },
            PipelineSettings {
                buy_amount: 0.1,
                metrics_timeframe: "1h".into(),
                debate_enabled: true,
                anchor_thread_id: "anchor".into(),
            },
        );
        Harness {
            orchestrator,
            tokens,
            trading,
            board,
            store,
            journal,
            _tmp: tmp,
        }
    }

    async fn stages(journal: &SharedJournal) -> Vec<String> {
        let guard = journal.lock().await;
        read_events(&guard)
            .into_iter()
            .filter(|e| e["kind"] == "pipeline_stage")
            .filter_map(|e| e["stage"].as_str().map(String::from))
            .collect()
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stage_transitions() {
        use PipelineStage as S;
        assert_eq!(S::Discovered.advance(S::DataGathered), Ok(S::DataGathered));
        assert_eq!(S::Voted.advance(S::Passed), Ok(S::Passed));
        assert_eq!(S::TradeExecuted.advance(S::Holding), Ok(S::Holding));
        assert!(S::Discovered.advance(S::Voted).is_err());
        assert!(S::Analyzed.advance(S::Aborted).is_err());
        assert!(S::Passed.advance(S::TradeExecuted).is_err());
        assert!(S::Holding.is_terminal());
        assert!(!S::Voted.is_terminal());
    }

    #[tokio::test]
    async fn test_invest_path_opens_holding() {
        let h = harness(FixedGenerator::vote(8, true), true);
        h.tokens.add("0xaa", Some(0.00001), false);

        let runs = h.orchestrator.process(&ids(&["0xaa"])).await;
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.stage, PipelineStage::Holding);
        assert_eq!(run.result.as_ref().unwrap().decision, Decision::Invest);

        let holding = h.store.holding("0xaa").unwrap().unwrap();
        assert_eq!(holding.status, HoldingStatus::Holding);
        assert_eq!(holding.entry_spend, 0.1);
        assert_eq!(holding.amount, 1000.0);
        assert!((holding.entry_price - 0.0001).abs() < 1e-12);
        assert_eq!(h.trading.buys.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.store.candidate_status("0xaa").unwrap(),
            Some(CandidateStatus::Analyzed)
        );

        assert_eq!(
            stages(&h.journal).await,
            vec!["data_gathered", "analyzed", "debated", "voted", "trade_executed", "holding"]
        );
    }

    #[tokio::test]
    async fn test_pass_path_never_trades() {
        let h = harness(FixedGenerator::vote(2, false), false);
        h.tokens.add("0xbb", Some(0.00001), false);

        let run = h.orchestrator.process(&ids(&["0xbb"])).await.remove(0);
        assert_eq!(run.stage, PipelineStage::Passed);
        assert_eq!(h.trading.buys.load(Ordering::SeqCst), 0);
        assert!(h.store.holding("0xbb").unwrap().is_none());
        assert_eq!(
            h.store.vote_decision("0xbb").unwrap().map(|(_, d)| d),
            Some("PASS".to_string())
        );
    }

    #[tokio::test]
    async fn test_untradable_aborts_before_analysis() {
        let h = harness(FixedGenerator::vote(8, true), false);
        h.tokens.add("0xcc", Some(0.00001), false);
        h.trading.lock_token("0xcc");

        let run = h.orchestrator.process(&ids(&["0xcc"])).await.remove(0);
        assert_eq!(run.stage, PipelineStage::Aborted);
        assert!(matches!(run.error, Some(PipelineError::NotTradable(_))));
        assert!(h.store.vote_decision("0xcc").unwrap().is_none());
        assert_eq!(
            h.store.candidate_status("0xcc").unwrap(),
            Some(CandidateStatus::Aborted)
        );
        assert_eq!(stages(&h.journal).await, vec!["aborted"]);
    }

    #[tokio::test]
    async fn test_market_failure_aborts() {
        let h = harness(FixedGenerator::vote(8, true), false);
        h.tokens.add("0xdd", Some(0.00001), false);
        h.tokens.fail_market("0xdd");

        let run = h.orchestrator.process(&ids(&["0xdd"])).await.remove(0);
        assert_eq!(run.stage, PipelineStage::Aborted);
        assert!(matches!(run.error, Some(PipelineError::DataFetch { .. })));
    }

    #[tokio::test]
    async fn test_failed_buy_keeps_decision() {
        let h = harness(FixedGenerator::vote(9, true), false);
        h.tokens.add("0xee", Some(0.00001), false);
        h.trading.fail_buys.store(true, Ordering::SeqCst);

        let run = h.orchestrator.process(&ids(&["0xee"])).await.remove(0);
        assert_eq!(run.stage, PipelineStage::TradeFailed);
        assert!(matches!(run.error, Some(PipelineError::TradeExecution { .. })));
        assert!(h.store.holding("0xee").unwrap().is_none());
        assert_eq!(
            h.store.vote_decision("0xee").unwrap().map(|(_, d)| d),
            Some("INVEST".to_string())
        );
    }

    #[tokio::test]
    async fn test_risk_rejection_is_trade_failure() {
        let h = harness(FixedGenerator::vote(9, true), false);
        h.tokens.add("0xff", Some(0.00001), false);
        *h.trading.balance.lock().unwrap() = 0.1;

        let run = h.orchestrator.process(&ids(&["0xff"])).await.remove(0);
        assert_eq!(run.stage, PipelineStage::TradeFailed);
        assert_eq!(h.trading.buys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_candidate_processed_once() {
        let h = harness(FixedGenerator::vote(2, false), false);
        h.tokens.add("0xaa", Some(0.00001), false);

        assert_eq!(h.orchestrator.process(&ids(&["0xaa"])).await.len(), 1);
        assert!(h.orchestrator.process(&ids(&["0xaa"])).await.is_empty());
        assert!(h.orchestrator.registry().has_seen("0xaa"));
    }

    #[tokio::test]
    async fn test_debate_opens_thread_then_replies() {
        let h = harness(FixedGenerator::vote(2, false), true);
        h.tokens.add("0xaa", Some(0.00001), false);

        h.orchestrator.process(&ids(&["0xaa"])).await;

        let threads = h.board.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].0, "alpha");
        assert_eq!(threads[0].1, "Token Analysis: Token 0xaa ($AA)");

        let replies = h.board.replies.lock().unwrap().clone();
        let authors: Vec<&str> = replies.iter().map(|r| r.0.as_str()).collect();
        assert_eq!(authors, vec!["degen", "sage", "contrarian"]);
        assert!(replies.iter().all(|r| r.1 == "thread-1"));
    }

    #[tokio::test]
    async fn test_debate_falls_back_to_anchor() {
        let h = harness(FixedGenerator::vote(2, false), true);
        h.tokens.add("0xaa", Some(0.00001), false);
        h.board.fail_threads.store(true, Ordering::SeqCst);

        let run = h.orchestrator.process(&ids(&["0xaa"])).await.remove(0);
        assert_eq!(run.stage, PipelineStage::Passed);

        let replies = h.board.replies.lock().unwrap().clone();
        assert_eq!(replies.len(), 4);
        assert!(replies.iter().all(|r| r.1 == "anchor"));
        assert_eq!(replies[0].0, "alpha");
    }
}
