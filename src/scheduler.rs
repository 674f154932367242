//! Independent periodic jobs on the Tokio runtime.
//!
//! Each job owns a mutex. A tick that finds the previous run still holding
//! it is skipped, so one job never overlaps itself. Shutdown stops the tick
//! loops and then waits, up to a deadline, for in-flight runs to release
//! their locks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> anyhow::Result<()>;
}

struct ScheduledJob {
    job: Arc<dyn PeriodicJob>,
    initial_delay: Duration,
    every: Duration,
    lock: Arc<Mutex<()>>,
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown_tx,
            loops: Vec::new(),
        }
    }

    /// First run after `initial_delay`, then every `every`.
    pub fn add(&mut self, job: Arc<dyn PeriodicJob>, initial_delay: Duration, every: Duration) {
        self.jobs.push(ScheduledJob {
            job,
            initial_delay,
            every,
            lock: Arc::new(Mutex::new(())),
        });
    }

    pub fn start(&mut self) {
        for scheduled in &self.jobs {
            let job = scheduled.job.clone();
            let lock = scheduled.lock.clone();
            let initial_delay = scheduled.initial_delay;
            let every = scheduled.every;
            let mut shutdown = self.shutdown_tx.subscribe();

            info!(
                "Scheduling {} every {}s (first in {}s)",
                job.name(),
                every.as_secs(),
                initial_delay.as_secs()
            );
            self.loops.push(tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(initial_delay) => {}
                    _ = shutdown.changed() => return,
                }

                let mut ticker = interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }

                    let Ok(guard) = lock.clone().try_lock_owned() else {
                        debug!("{} still running, skipping tick", job.name());
                        continue;
                    };
                    let job = job.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(e) = job.run().await {
                            warn!("{} failed: {:#}", job.name(), e);
                        }
                    });
                }
            }));
        }
    }

    /// Stops ticking and waits for running jobs. Returns false when the
    /// deadline passed with a job still running.
    pub async fn shutdown(self, drain_timeout: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);
        for handle in self.loops {
            let _ = handle.await;
        }

        let deadline = Instant::now() + drain_timeout;
        let mut drained = true;
        for scheduled in &self.jobs {
            if timeout_at(deadline, scheduled.lock.lock()).await.is_err() {
                warn!("{} did not finish before shutdown deadline", scheduled.job.name());
                drained = false;
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        started: AtomicUsize,
        finished: AtomicUsize,
        work: Duration,
    }

    impl Counting {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                work,
            })
        }
    }

    #[async_trait]
    impl PeriodicJob for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            sleep(self.work).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_then_interval() {
        let job = Counting::new(Duration::ZERO);
        let mut scheduler = Scheduler::new();
        scheduler.add(job.clone(), Duration::from_secs(10), Duration::from_secs(60));
        scheduler.start();

        sleep(Duration::from_secs(9)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 1);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 2);

        assert!(scheduler.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_job_skips_ticks() {
        let job = Counting::new(Duration::from_secs(150));
        let mut scheduler = Scheduler::new();
        scheduler.add(job.clone(), Duration::ZERO, Duration::from_secs(60));
        scheduler.start();

        // Ticks at 60s and 120s land while the first run is still going.
        sleep(Duration::from_secs(170)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 1);
        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
        sleep(Duration::from_secs(20)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 2);

        scheduler.shutdown(Duration::from_secs(600)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_in_flight_job() {
        let job = Counting::new(Duration::from_secs(30));
        let mut scheduler = Scheduler::new();
        scheduler.add(job.clone(), Duration::ZERO, Duration::from_secs(60));
        scheduler.start();

        sleep(Duration::from_secs(1)).await;
        assert!(scheduler.shutdown(Duration::from_secs(60)).await);
        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
        assert_eq!(job.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deadline() {
        let job = Counting::new(Duration::from_secs(300));
        let mut scheduler = Scheduler::new();
        scheduler.add(job.clone(), Duration::ZERO, Duration::from_secs(60));
        scheduler.start();

        sleep(Duration::from_secs(1)).await;
        assert!(!scheduler.shutdown(Duration::from_secs(10)).await);
        assert_eq!(job.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_run() {
        let job = Counting::new(Duration::ZERO);
        let mut scheduler = Scheduler::new();
        scheduler.add(job.clone(), Duration::from_secs(300), Duration::from_secs(60));
        scheduler.start();

        assert!(scheduler.shutdown(Duration::from_secs(1)).await);
        assert_eq!(job.started.load(Ordering::SeqCst), 0);
    }
}
