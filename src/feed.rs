//! Candidate queue and the periodic jobs that feed and drain it.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use candidate_engine::CandidateRegistry;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::ledger::HoldingLedger;
use crate::orchestrator::PipelineOrchestrator;
use crate::report::{ReportOutcome, SummaryReport};
use crate::scheduler::PeriodicJob;

#[derive(Default)]
struct QueueState {
    order: VecDeque<String>,
    queued: HashSet<String>,
}

/// FIFO of candidate ids waiting for the pipeline. An id is queued at most
/// once at a time.
pub struct CandidateQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl CandidateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns how many ids were actually added.
    pub fn extend<I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state();
        let mut added = 0;
        for id in ids {
            if state.order.len() >= self.capacity {
                warn!("Candidate queue full ({}), dropping {}", self.capacity, id);
                continue;
            }
            if state.queued.insert(id.clone()) {
                state.order.push_back(id);
                added += 1;
            }
        }
        added
    }

    pub fn pop(&self) -> Option<String> {
        let mut state = self.state();
        let id = state.order.pop_front()?;
        state.queued.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.state().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs the pipeline on at most one queued candidate per tick.
pub struct QueueJob {
    queue: Arc<CandidateQueue>,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl QueueJob {
    pub fn new(queue: Arc<CandidateQueue>, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            queue,
            orchestrator,
        }
    }
}

#[async_trait]
impl PeriodicJob for QueueJob {
    fn name(&self) -> &str {
        "queue"
    }

    async fn run(&self) -> Result<()> {
        // Already-seen ids are dropped without spending the tick.
        let next = loop {
            match self.queue.pop() {
                Some(id) if self.orchestrator.registry().has_seen(&id) => {
                    debug!("Dropping already seen {}", id);
                }
                other => break other,
            }
        };
        let Some(id) = next else {
            debug!("Candidate queue empty");
            return Ok(());
        };

        info!("Processing {} ({} still queued)", id, self.queue.len());
        for run in self.orchestrator.process(&[id]).await {
            if let Some(e) = run.error {
                warn!("{} stopped at {}: {}", run.candidate_id, run.stage, e);
            }
        }
        Ok(())
    }
}

/// Walks the trader graph from a random seed and queues what it finds.
pub struct CrawlJob {
    queue: Arc<CandidateQueue>,
    registry: Arc<CandidateRegistry>,
    seeds: Vec<String>,
}

impl CrawlJob {
    pub fn new(
        queue: Arc<CandidateQueue>,
        registry: Arc<CandidateRegistry>,
        seeds: Vec<String>,
    ) -> Self {
        Self {
            queue,
            registry,
            seeds,
        }
    }
}

#[async_trait]
impl PeriodicJob for CrawlJob {
    fn name(&self) -> &str {
        "crawl"
    }

    async fn run(&self) -> Result<()> {
        let Some(seed) = self.seeds.choose(&mut rand::thread_rng()).cloned() else {
            debug!("No crawl seeds configured");
            return Ok(());
        };
        let ids = self.registry.crawl(&seed).await?;
        let added = self.queue.extend(ids);
        info!("Crawl from {} queued {} tokens", seed, added);
        Ok(())
    }
}

pub struct ExitJob {
    ledger: Arc<HoldingLedger>,
}

impl ExitJob {
    pub fn new(ledger: Arc<HoldingLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl PeriodicJob for ExitJob {
    fn name(&self) -> &str {
        "exit_sweep"
    }

    async fn run(&self) -> Result<()> {
        let report = self.ledger.sweep().await?;
        if report.checked > 0 {
            info!(
                "Exit sweep: checked={} priced={} anchored={} sold={} errors={}",
                report.checked,
                report.priced,
                report.anchored,
                report.sold.len(),
                report.errors.len()
            );
        }
        Ok(())
    }
}

pub struct ReportJob {
    report: Arc<SummaryReport>,
}

impl ReportJob {
    pub fn new(report: Arc<SummaryReport>) -> Self {
        Self { report }
    }
}

#[async_trait]
impl PeriodicJob for ReportJob {
    fn name(&self) -> &str {
        "report"
    }

    async fn run(&self) -> Result<()> {
        match self.report.publish().await? {
            ReportOutcome::Published { thread_id } => {
                info!("Summary report published (thread {:?})", thread_id)
            }
            ReportOutcome::Skipped { retry_in_secs } => {
                info!("Summary report skipped, cooldown {}s", retry_in_secs)
            }
            ReportOutcome::LoggedOnly => debug!("Summary report logged only"),
        }
        Ok(())
    }
}
