use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::models::job::Job;
use crate::services::processor::{panic_message, JobProcessor};
use crate::services::queue::JobQueue;

/// Top-level reason for a job whose task died before its own terminal write.
pub const UNHANDLED_JOB_ERROR: &str = "Unhandled error in job processing";

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    /// Delay between claim attempts.
    pub poll_interval: Duration,

    /// Ceiling on jobs running at the same time.
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            max_concurrent_jobs: 1,
        }
    }
}

impl From<&WorkerConfig> for WorkerLoopConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_concurrent_jobs: config.max_concurrent_jobs,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still deciding whether to claim.
    Busy,
    /// The concurrency ceiling is reached.
    AtCapacity,
    /// Nothing was claimable.
    Idle,
    /// A job was claimed and handed to a background task.
    Claimed(Uuid),
    /// The job store could not be reached.
    ClaimFailed,
    /// Shutdown has begun; no more claims.
    Stopped,
}

/// Resets the tick guard even if the claim future is dropped or panics.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Polls the job store on a fixed interval and starts job runs in the
/// background, up to the concurrency ceiling.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    config: WorkerLoopConfig,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    ticking: AtomicBool,
    accepting: AtomicBool,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, processor: Arc<JobProcessor>, config: WorkerLoopConfig) -> Self {
        Self {
            queue,
            processor,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            ticking: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
        }
    }

    /// Tick until `shutdown` resolves, then stop accepting claims.
    ///
    /// Jobs already running are left to finish on their own tasks.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Worker loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    tracing::trace!(outcome = ?outcome, "Worker tick");
                }
            }
        }

        self.stop_accepting();
        tracing::info!(in_flight = self.in_flight_count(), "Worker loop stopped");
    }

    /// Claim at most one job and start it without waiting for it to finish.
    pub async fn tick(&self) -> TickOutcome {
        if !self.accepting.load(Ordering::SeqCst) {
            return TickOutcome::Stopped;
        }
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TickOutcome::Busy;
        }
        let _guard = TickGuard(&self.ticking);

        if self.in_flight_count() >= self.config.max_concurrent_jobs {
            return TickOutcome::AtCapacity;
        }

        match self.queue.claim().await {
            Ok(None) => TickOutcome::Idle,
            Ok(Some(job)) => {
                let job_id = job.id;
                let running = {
                    let mut in_flight = self.in_flight.lock();
                    in_flight.insert(job_id);
                    in_flight.len()
                };
                metrics::counter!("listing_jobs_claimed_total").increment(1);
                metrics::gauge!("listing_jobs_in_flight").set(running as f64);
                tracing::info!(job_id = %job_id, in_flight = running, "Claimed listing job");

                self.spawn_job(job);
                TickOutcome::Claimed(job_id)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim job");
                TickOutcome::ClaimFailed
            }
        }
    }

    fn spawn_job(&self, job: Job) {
        let processor = self.processor.clone();
        let in_flight = self.in_flight.clone();
        let job_id = job.id;

        tokio::spawn(async move {
            let job_processor = processor.clone();
            let run = tokio::spawn(
                async move { job_processor.process(job).await }
                    .instrument(tracing::info_span!("job", job_id = %job_id)),
            );

            if let Err(e) = run.await {
                let cause = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                let reason = format!("{}: {}", UNHANDLED_JOB_ERROR, cause);
                metrics::counter!("listing_jobs_failed_total").increment(1);
                processor.fail_job(job_id, UNHANDLED_JOB_ERROR, &reason).await;
            }

            let remaining = {
                let mut in_flight = in_flight.lock();
                in_flight.remove(&job_id);
                in_flight.len()
            };
            metrics::gauge!("listing_jobs_in_flight").set(remaining as f64);
        });
    }

    /// Refuse further claims; used when shutdown begins.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn in_flight_jobs(&self) -> Vec<Uuid> {
        self.in_flight.lock().iter().copied().collect()
    }
}
