//! Zombie recovery.
//!
//! A job stuck in `processing` whose last attempt is old belongs to a
//! process that died mid-execution. The sweeper puts such jobs back in
//! play without charging the retry budget: the interrupted attempt
//! never ran to a verdict, so it is free. Jobs that already spent
//! their budget are closed out as errors instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::TuningSource;
use crate::job::{Job, JobStatus, JobStore, JobStoreError};
use crate::limiter::ConcurrencyLimiter;
use crate::metrics;

/// Periodically reclaims jobs abandoned mid-execution.
pub struct ZombieSweeper {
    store: Arc<dyn JobStore>,
    limiter: Arc<ConcurrencyLimiter>,
    tuning: Arc<dyn TuningSource>,

    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ZombieSweeper {
    pub fn new(
        store: Arc<dyn JobStore>,
        limiter: Arc<ConcurrencyLimiter>,
        tuning: Arc<dyn TuningSource>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            limiter,
            tuning,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Reclaim every `processing` job, regardless of age. Run once at
    /// startup: this process just started, so nothing can legitimately
    /// be mid-execution yet.
    pub fn recover_startup(&self) -> Result<u32, JobStoreError> {
        let zombies = self.store.list_stale_processing(None)?;
        let count = zombies.len() as u32;
        if count > 0 {
            info!(count, "recovering jobs left processing by a previous run");
        }
        for job in zombies {
            self.recover(job)?;
        }
        Ok(count)
    }

    /// One sweep over jobs whose last attempt predates the staleness
    /// threshold.
    pub fn sweep_once(&self) -> Result<u32, JobStoreError> {
        let sweeper = self.tuning.current().sweeper;
        let cutoff = Utc::now() - chrono::Duration::seconds(sweeper.stale_after_secs);

        let zombies = self.store.list_stale_processing(Some(cutoff))?;
        let count = zombies.len() as u32;
        for job in zombies {
            self.recover(job)?;
        }
        Ok(count)
    }

    /// Put one abandoned job back in play, or close it out if its
    /// budget is spent. Neither `retry_count` nor `last_attempt_at`
    /// is touched on a reset: the interrupted attempt does not count,
    /// and a fresh timestamp would put the job straight into cooldown.
    fn recover(&self, mut job: Job) -> Result<(), JobStoreError> {
        let max_attempts = self.tuning.current().retry.max_attempts;

        if let Some(token) = job.lease_token.take() {
            if let Err(e) = self.limiter.release_token(&token) {
                warn!(job_id = %job.id, error = %e, "failed to revoke zombie's lease");
            }
        }

        if job.retry_count >= max_attempts {
            warn!(job_id = %job.id, retry_count = job.retry_count, "zombie had no budget left, closing as error");
            job.status = JobStatus::Error;
            if job.error_detail.is_none() {
                job.error_detail = Some(format!(
                    "abandoned mid-execution after {} attempts",
                    job.retry_count
                ));
            }
        } else {
            info!(job_id = %job.id, retry_count = job.retry_count, "resetting zombie to pending");
            job.status = JobStatus::Pending;
        }

        self.store.update(&job)?;
        metrics::ZOMBIES_RECOVERED.inc();
        Ok(())
    }

    /// Start the periodic sweep task.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Sweeper already running");
            return;
        }

        let sweeper = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Sweep loop started");
            loop {
                let interval = sweeper.tuning.current().sweeper.interval_secs;
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match sweeper.sweep_once() {
                            Ok(0) => {}
                            Ok(count) => info!(count, "sweep recovered zombies"),
                            Err(e) => warn!("Sweep failed: {}", e),
                        }
                    }
                }
            }
            info!("Sweep loop stopped");
        });
    }

    /// Stop the periodic sweep task.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}
