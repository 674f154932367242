//! Syndicate-bot: bonding-curve token syndicate.
//!
//! Single-binary Tokio application that:
//! 1. Discovers candidate tokens by crawling recent traders
//! 2. Gathers market data and runs the four-persona evaluator panel
//! 3. Debates each candidate on the board under per-persona identities
//! 4. Aggregates votes and buys on INVEST
//! 5. Sweeps open holdings for take-profit / stop-loss exits

mod config;
mod feed;
mod journal;
mod ledger;
mod orchestrator;
mod report;
mod risk;
mod scheduler;
mod store;

#[cfg(test)]
mod testing;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info, warn};

use candidate_engine::{CandidateRegistry, NadFunClient, TokenDataProvider};
use decision_engine::{EvaluatorPanel, Role, VoteAggregator};
use execution_engine::{ExecutionEngine, RelayTradingClient, TradingProvider};
use llm_client::{
    AnthropicClient, CachedGenerator, FallbackChain, GenerationCache, OpenAiClient, TextGenerator,
};
use publish_client::{Identity, IdentityRateLimiter, MoltbookClient};

use crate::config::AppConfig;
use crate::feed::{CandidateQueue, CrawlJob, ExitJob, QueueJob, ReportJob};
use crate::journal::{record, resolve_journal_dir, AuditEvent, EventJournal};
use crate::ledger::{ExitPolicy, HoldingLedger};
use crate::orchestrator::{PipelineDeps, PipelineOrchestrator, PipelineSettings};
use crate::report::SummaryReport;
use crate::risk::RiskGuard;
use crate::scheduler::Scheduler;
use crate::store::SqliteStore;

/// Bonding-curve token syndicate bot
#[derive(Parser)]
#[command(name = "syndicate-bot", about = "Bonding-curve token syndicate bot")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Run the pipeline once on these token ids and exit.
    #[arg(long, num_args = 1..)]
    once: Vec<String>,

    /// Force dry-run trading regardless of config.
    #[arg(long)]
    dry_run: bool,

    /// Use canned persona votes instead of calling a model.
    #[arg(long)]
    offline: bool,
}

fn build_trading(cfg: &AppConfig) -> Result<Arc<dyn TradingProvider>> {
    let engine = match cfg.trading.relay_url.as_deref() {
        Some(url) => {
            let relay = RelayTradingClient::new(
                url,
                cfg.trading.relay_token.clone(),
                cfg.trading.slippage_bps,
                cfg.trading.deadline_secs,
            )
            .context("Failed to build trading relay client")?;
            ExecutionEngine::new(Arc::new(relay), cfg.trading.dry_run)
        }
        None => {
            info!(
                "No trading relay configured, paper balance {}",
                cfg.trading.paper_balance
            );
            ExecutionEngine::detached(cfg.trading.paper_balance)
        }
    };
    Ok(Arc::new(engine))
}

fn build_panel(cfg: &AppConfig, store: &Arc<SqliteStore>) -> Result<EvaluatorPanel> {
    if cfg.panel.offline {
        info!("Evaluator panel: offline fixtures");
        return Ok(EvaluatorPanel::offline());
    }
    if !cfg.has_llm_key() {
        warn!("No model API key configured, falling back to offline fixtures");
        return Ok(EvaluatorPanel::offline());
    }

    let llm = &cfg.llm;
    let mut providers: Vec<Arc<dyn TextGenerator>> = Vec::new();
    if let Some(key) = &llm.anthropic_api_key {
        providers.push(Arc::new(AnthropicClient::new(
            key.clone(),
            llm.primary_model.clone(),
            llm.timeout_ms,
            llm.max_tokens,
            llm.max_retries,
        )?));
    }
    if let Some(key) = &llm.openai_api_key {
        providers.push(Arc::new(OpenAiClient::new(
            key.clone(),
            llm.fallback_model.clone(),
            llm.timeout_ms,
            llm.max_tokens,
            llm.max_retries,
        )?));
    }
    info!(
        "Evaluator panel: {} provider(s), cache {}",
        providers.len(),
        if cfg.panel.cache_enabled { "on" } else { "off" }
    );

    let chain: Arc<dyn TextGenerator> = Arc::new(FallbackChain::new(providers));
    let generator: Arc<dyn TextGenerator> = if cfg.panel.cache_enabled {
        let cache: Arc<dyn GenerationCache> = store.clone();
        Arc::new(CachedGenerator::new(chain, cache))
    } else {
        chain
    };
    Ok(EvaluatorPanel::new(generator))
}

fn build_publisher(cfg: &AppConfig) -> Result<Option<Arc<IdentityRateLimiter>>> {
    let publishing = &cfg.publishing;
    if !publishing.enabled {
        info!("Publishing disabled");
        return Ok(None);
    }

    let keys: HashMap<Identity, String> = Role::ALL
        .iter()
        .filter_map(|role| {
            publishing
                .api_keys
                .get(role.as_str())
                .map(|key| (Identity::new(role.as_str()), key.clone()))
        })
        .collect();
    if keys.is_empty() {
        warn!("Publishing enabled but no identity has an API key, debates are skipped");
        return Ok(None);
    }
    info!("Publishing as {} identities to {}", keys.len(), publishing.community);

    let client = MoltbookClient::new(
        &publishing.base_url,
        &publishing.community,
        keys,
        publishing.requests_per_minute,
    )?;
    Ok(Some(Arc::new(IdentityRateLimiter::with_cooldowns(
        Arc::new(client),
        Duration::from_secs(publishing.thread_cooldown_secs),
        Duration::from_secs(publishing.reply_cooldown_secs),
    ))))
}

struct Components {
    store: Arc<SqliteStore>,
    tokens: Arc<dyn TokenDataProvider>,
    trading: Arc<dyn TradingProvider>,
    panel: EvaluatorPanel,
    publisher: Option<Arc<IdentityRateLimiter>>,
    registry: Arc<CandidateRegistry>,
}

fn build_components(cfg: &AppConfig) -> Result<Components> {
    let store = Arc::new(SqliteStore::open(Path::new(&cfg.storage.database_path))?);
    let tokens: Arc<dyn TokenDataProvider> = Arc::new(
        NadFunClient::new(cfg.network.api_url(), cfg.network.api_key.clone())
            .context("Failed to build token data client")?,
    );
    let trading = build_trading(cfg)?;
    let panel = build_panel(cfg, &store)?;
    let publisher = build_publisher(cfg)?;

    // Only finished candidates count as seen; interrupted ones are re-queued.
    let finished = store.finished_ids()?;
    info!("{} candidates already finished", finished.len());
    let registry = Arc::new(CandidateRegistry::with_seen(tokens.clone(), finished));

    Ok(Components {
        store,
        tokens,
        trading,
        panel,
        publisher,
        registry,
    })
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "syndicate_bot=info,candidate_engine=info,decision_engine=info,\
                 execution_engine=info,publish_client=info,llm_client=info"
                    .into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("Syndicate Bot starting up...");

    // Load configuration.
    let mut cfg = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    if cli.dry_run {
        cfg.trading.dry_run = true;
    }
    if cli.offline {
        cfg.panel.offline = true;
    }

    info!("Network: {} ({})", cfg.network.network.as_str(), cfg.network.api_url());
    info!(
        "Voting: threshold={} min_yes={}",
        cfg.voting.threshold, cfg.voting.min_yes_votes
    );
    info!(
        "Trading: {} buy={} slippage={}bps",
        if cfg.trading.dry_run { "DRY-RUN" } else { "LIVE" },
        cfg.trading.buy_amount,
        cfg.trading.slippage_bps
    );
    info!(
        "Risk: tp={}% sl={}% reserve={} max_open={} buys/h={}",
        cfg.risk.take_profit_percent,
        cfg.risk.stop_loss_percent,
        cfg.risk.min_reserve,
        cfg.risk.max_open_holdings,
        cfg.risk.max_buys_per_hour
    );

    let journal = match EventJournal::open(resolve_journal_dir(cfg.storage.journal_dir.as_deref()))
    {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to initialize event journal: {}", e);
            std::process::exit(1);
        }
    };
    info!("Event journal path: {}", journal.dir().display());
    let journal_file = journal.current_file();
    let journal = journal.shared();
    record(
        &journal,
        AuditEvent::new("bot_start", "syndicate-bot starting").payload(json!({
            "network": cfg.network.network.as_str(),
            "journal_file": journal_file.display().to_string(),
            "mode": if cfg.trading.dry_run { "dry_run" } else { "live" },
            "panel": if cfg.panel.offline { "offline" } else { "llm" },
            "publishing": cfg.publishing.enabled,
            "debate": cfg.debate.enabled,
            "voting": {
                "threshold": cfg.voting.threshold,
                "min_yes_votes": cfg.voting.min_yes_votes
            },
            "schedule": {
                "queue_interval_secs": cfg.schedule.queue_interval_secs,
                "crawl_interval_secs": cfg.schedule.crawl_interval_secs,
                "exit_interval_secs": cfg.schedule.exit_interval_secs,
                "report_interval_secs": cfg.schedule.report_interval_secs
            }
        })),
    )
    .await;

    // ── Components ───────────────────────────────────────────────────
    let Components {
        store,
        tokens,
        trading,
        panel,
        publisher,
        registry,
    } = match build_components(&cfg) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            record(
                &journal,
                AuditEvent::new("startup_failed", format!("{:#}", e)),
            )
            .await;
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        PipelineDeps {
            registry: registry.clone(),
            tokens: tokens.clone(),
            trading: trading.clone(),
            panel,
            aggregator: VoteAggregator::new(cfg.voting.threshold, cfg.voting.min_yes_votes),
            publisher: publisher.clone(),
            store: store.clone(),
            journal: journal.clone(),
            risk: RiskGuard::new(cfg.risk.clone()),
        },
        PipelineSettings::from_config(&cfg),
    ));
    let ledger = Arc::new(HoldingLedger::new(
        tokens.clone(),
        trading.clone(),
        store.clone(),
        journal.clone(),
        ExitPolicy::from_config(&cfg.risk),
    ));
    let report = Arc::new(SummaryReport::new(
        store.clone(),
        ledger.clone(),
        publisher,
        journal.clone(),
    ));

    // ── Once mode ────────────────────────────────────────────────────
    if !cli.once.is_empty() {
        info!("Running pipeline once on {} token(s)...", cli.once.len());
        for id in cli.once.iter().filter(|id| registry.has_seen(id)) {
            match (store.candidate_status(id), store.vote_decision(id)) {
                (_, Ok(Some((score, decision)))) => {
                    info!("{} already analyzed: {} at {:.2}", id, decision, score)
                }
                (Ok(Some(status)), _) => info!("{} already {}", id, status.as_str()),
                _ => info!("{} already seen", id),
            }
        }
        for run in orchestrator.process(&cli.once).await {
            if let Some(e) = &run.error {
                warn!("{} stopped at {}: {}", run.candidate_id, run.stage, e);
            }
            if let Some(result) = &run.result {
                info!(
                    "{} decision {} (score {:.2}, {} YES)",
                    run.candidate_id,
                    result.decision.as_str(),
                    result.weighted_score,
                    result.yes_count
                );
            }
            if let Some(holding) = &run.holding {
                info!(
                    "{} holding {} tokens at {:.10}",
                    run.candidate_id, holding.amount, holding.entry_price
                );
            }
        }
        record(
            &journal,
            AuditEvent::new("bot_shutdown", "once mode complete"),
        )
        .await;
        return;
    }

    // ── Candidate queue ──────────────────────────────────────────────
    let queue = Arc::new(CandidateQueue::new(cfg.discovery.max_queue));
    match store.pending_ids() {
        Ok(pending) => {
            let requeued = queue.extend(pending);
            if requeued > 0 {
                info!("Re-queued {} candidates interrupted before analysis", requeued);
            }
        }
        Err(e) => warn!("Could not load pending candidates: {}", e),
    }

    let seed_queue = queue.clone();
    let seeds = cfg.discovery.seeds.clone();
    let seed_delay = Duration::from_secs(cfg.schedule.seed_delay_secs);
    let seed_handle = tokio::spawn(async move {
        sleep(seed_delay).await;
        let added = seed_queue.extend(seeds);
        info!("Queued {} seed tokens", added);
    });

    // ── Spawn tasks ──────────────────────────────────────────────────
    info!("Spawning tasks...");
    let schedule = &cfg.schedule;
    let mut scheduler = Scheduler::new();
    let every = |secs: u64| Duration::from_secs(secs);
    scheduler.add(
        Arc::new(QueueJob::new(queue.clone(), orchestrator.clone())),
        every(schedule.queue_interval_secs),
        every(schedule.queue_interval_secs),
    );
    scheduler.add(
        Arc::new(CrawlJob::new(
            queue.clone(),
            registry.clone(),
            cfg.discovery.seeds.clone(),
        )),
        every(schedule.crawl_interval_secs),
        every(schedule.crawl_interval_secs),
    );
    scheduler.add(
        Arc::new(ExitJob::new(ledger.clone())),
        every(schedule.exit_interval_secs),
        every(schedule.exit_interval_secs),
    );
    scheduler.add(
        Arc::new(ReportJob::new(report.clone())),
        every(schedule.report_initial_delay_secs),
        every(schedule.report_interval_secs),
    );
    scheduler.start();

    info!("✅ All tasks spawned. Bot is running.");

    let shutdown_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            "ctrl_c"
        }
    };

    seed_handle.abort();
    let drained = scheduler
        .shutdown(Duration::from_secs(cfg.schedule.drain_timeout_secs))
        .await;
    if !drained {
        warn!("Shutdown deadline passed with jobs still running");
    }
    record(
        &journal,
        AuditEvent::new("bot_shutdown", "syndicate-bot stopped").payload(json!({
            "reason": shutdown_reason,
            "drained": drained,
            "seen": registry.seen_count(),
            "queued": queue.len()
        })),
    )
    .await;
    info!("Syndicate Bot shut down.");
}
