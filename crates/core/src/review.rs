//! Sequential quality review queue.
//!
//! Review is a non-critical side effect of job completion: it runs off
//! the critical path, strictly one task at a time, with a fixed pause
//! between tasks so the downstream reviewer's rate limit is respected.
//! A review failure writes a fallback verdict and moves on; it never
//! touches the job's main status.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::TuningSource;
use crate::job::JobStore;
use crate::metrics;
use crate::provider::ProviderError;

use async_trait::async_trait;

/// Judges the quality of a finished artifact and returns a verdict
/// string for the job's review field.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, job_id: &str, artifact_ref: &str) -> Result<String, ProviderError>;
}

/// One unit of review work.
#[derive(Debug, Clone)]
pub struct ReviewTask {
    pub job_id: String,
    pub artifact_ref: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Handle for enqueueing review tasks.
///
/// Cheaply cloneable. Enqueueing blocks when the buffer is full; if
/// the worker is gone the task is dropped with a log line, never an
/// error to the caller.
#[derive(Clone)]
pub struct ReviewHandle {
    tx: mpsc::Sender<ReviewTask>,
}

impl ReviewHandle {
    pub fn new(tx: mpsc::Sender<ReviewTask>) -> Self {
        Self { tx }
    }

    pub async fn enqueue(&self, job_id: &str, artifact_ref: &str) {
        let task = ReviewTask {
            job_id: job_id.to_string(),
            artifact_ref: artifact_ref.to_string(),
            enqueued_at: Utc::now(),
        };
        if let Err(e) = self.tx.send(task).await {
            error!("Failed to enqueue review task: {}", e);
        } else {
            metrics::REVIEW_QUEUE_DEPTH.inc();
        }
    }

    /// Enqueue without blocking. Returns false if the buffer is full
    /// or the worker is gone.
    pub fn try_enqueue(&self, job_id: &str, artifact_ref: &str) -> bool {
        let task = ReviewTask {
            job_id: job_id.to_string(),
            artifact_ref: artifact_ref.to_string(),
            enqueued_at: Utc::now(),
        };
        match self.tx.try_send(task) {
            Ok(()) => {
                metrics::REVIEW_QUEUE_DEPTH.inc();
                true
            }
            Err(e) => {
                error!("Failed to enqueue review task: {}", e);
                false
            }
        }
    }
}

/// Single worker draining the review queue in FIFO order.
pub struct ReviewWorker {
    rx: mpsc::Receiver<ReviewTask>,
    reviewer: Arc<dyn Reviewer>,
    store: Arc<dyn JobStore>,
    tuning: Arc<dyn TuningSource>,
}

impl ReviewWorker {
    pub fn new(
        rx: mpsc::Receiver<ReviewTask>,
        reviewer: Arc<dyn Reviewer>,
        store: Arc<dyn JobStore>,
        tuning: Arc<dyn TuningSource>,
    ) -> Self {
        Self {
            rx,
            reviewer,
            store,
            tuning,
        }
    }

    /// Run the worker, consuming tasks until every handle is dropped.
    ///
    /// Spawn this as a background task. Waiting on an empty queue is
    /// an idle channel receive, not a poll.
    pub async fn run(mut self) {
        info!("Review worker started");

        while let Some(task) = self.rx.recv().await {
            metrics::REVIEW_QUEUE_DEPTH.dec();

            let verdict = match self.reviewer.review(&task.job_id, &task.artifact_ref).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(job_id = %task.job_id, error = %e, "review call failed");
                    format!("review unavailable: {}", e.message())
                }
            };

            if let Err(e) = self.store.set_review(&task.job_id, &verdict) {
                error!(job_id = %task.job_id, "Failed to record review verdict: {}", e);
            } else {
                metrics::REVIEWS_COMPLETED.inc();
            }

            let delay = self.tuning.current().review.inter_task_delay_ms;
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        info!("Review worker shutting down");
    }
}

/// Create a complete review queue.
///
/// Returns:
/// - `ReviewHandle` - for enqueueing tasks (clone to share across tasks)
/// - `ReviewWorker` - spawn with `tokio::spawn(worker.run())`
pub fn create_review_queue(
    reviewer: Arc<dyn Reviewer>,
    store: Arc<dyn JobStore>,
    tuning: Arc<dyn TuningSource>,
) -> (ReviewHandle, ReviewWorker) {
    let buffer_size = tuning.current().review.buffer_size;
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = ReviewHandle::new(tx);
    let worker = ReviewWorker::new(rx, reviewer, store, tuning);
    (handle, worker)
}
