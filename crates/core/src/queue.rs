//! Job submission and the dispatch loop.
//!
//! The dispatcher scans pending single jobs, orders them fairly, and
//! admits as many as the limiter allows, each into its own spawned
//! retry-controller task. Pipeline-step jobs are not dispatched here;
//! the chain orchestrator drives those itself under its own lease.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TuningSource;
use crate::job::{CreateJobRequest, FairScheduler, Job, JobFilter, JobKind, JobStatus, JobStore, JobStoreError};
use crate::limiter::ConcurrencyLimiter;
use crate::metrics;
use crate::retry::{RetryController, RetryError};
use crate::review::ReviewHandle;

/// Accepts jobs and drives pending ones through execution.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    scheduler: FairScheduler,
    limiter: Arc<ConcurrencyLimiter>,
    controller: Arc<RetryController>,
    review: Option<ReviewHandle>,
    tuning: Arc<dyn TuningSource>,

    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        limiter: Arc<ConcurrencyLimiter>,
        controller: Arc<RetryController>,
        review: Option<ReviewHandle>,
        tuning: Arc<dyn TuningSource>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            scheduler: FairScheduler::new(tuning.clone()),
            limiter,
            controller,
            review,
            tuning,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Accept a new job. It becomes visible to the next dispatch scan.
    pub fn submit(&self, request: CreateJobRequest) -> Result<Job, JobStoreError> {
        let job = self.store.create(request)?;
        metrics::JOBS_SUBMITTED.inc();
        info!(job_id = %job.id, owner_id = %job.owner_id, "job submitted");
        Ok(job)
    }

    /// One dispatch scan: order the pending batch fairly, admit what
    /// the limiter allows, spawn one execution task per admission.
    /// Returns the spawned task handles.
    pub fn dispatch_once(&self) -> Result<Vec<JoinHandle<()>>, JobStoreError> {
        let tuning = self.tuning.current();

        let pending = self.store.list(
            &JobFilter::new()
                .with_status(JobStatus::Pending)
                .with_kind(JobKind::Single)
                .with_limit(tuning.queue.batch_size),
        )?;

        let ordered = self.scheduler.order(pending);
        let now = Utc::now();
        let mut handles = Vec::new();

        for job in ordered {
            // A job inside its cooldown window would only be bounced
            // by the controller; don't waste a lease on it.
            if job.retry_count > 0 {
                if let Some(last) = job.last_attempt_at {
                    if (now - last).num_seconds() < tuning.retry.cooldown_secs {
                        continue;
                    }
                }
            }

            let lease = match self
                .limiter
                .acquire(job.kind.category(), Some(&job.owner_id))
            {
                Ok(Some(lease)) => lease,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Lease acquisition failed: {}", e);
                    break;
                }
            };

            debug!(job_id = %job.id, "job admitted");

            let controller = Arc::clone(&self.controller);
            let review = self.review.clone();
            let job_id = job.id.clone();

            handles.push(tokio::spawn(async move {
                match controller.run_with_retry(&job_id, Some(lease)).await {
                    Ok(done) => {
                        if let (Some(review), Some(artifact)) = (review, done.result_ref.as_deref())
                        {
                            review.enqueue(&done.id, artifact).await;
                        }
                    }
                    Err(RetryError::CoolingDown { .. }) => {}
                    Err(e) => {
                        warn!(job_id, "job run ended in failure: {}", e);
                    }
                }
            }));
        }

        Ok(handles)
    }

    /// Start the periodic dispatch task.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher already running");
            return;
        }

        let queue = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Dispatch loop started");
            loop {
                let poll_ms = queue.tuning.current().queue.poll_interval_ms;
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(poll_ms)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = queue.dispatch_once() {
                            warn!("Dispatch scan failed: {}", e);
                        }
                    }
                }
            }
            info!("Dispatch loop stopped");
        });
    }

    /// Stop the periodic dispatch task. In-flight jobs run on.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}
