//! Bounded retry execution of a single job.
//!
//! One controller invocation owns one job's whole failure domain:
//! nothing that happens here propagates to other jobs. The retry
//! budget lives on the job row, not in memory, so a process restart
//! cannot reset a job to attempt one indefinitely.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{RetryTuning, TuningSource};
use crate::job::{Job, JobStatus, JobStore, JobStoreError};
use crate::limiter::{ConcurrencyLimiter, Lease};
use crate::metrics;
use crate::notify::Notifier;
use crate::provider::Provider;

/// Error type for retry controller runs.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The job was attempted too recently; this trigger is a duplicate.
    #[error("Job {job_id} is cooling down")]
    CoolingDown { job_id: String },

    /// The provider failed in a way retrying cannot fix.
    #[error("Job {job_id} failed terminally: {message}")]
    Terminal { job_id: String, message: String },

    /// All attempts spent.
    #[error("Job {job_id} failed after {attempts} attempts: {message}")]
    Exhausted {
        job_id: String,
        attempts: u32,
        message: String,
    },

    /// Storage error.
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Backoff before the next attempt: geometric in the attempt number,
/// plus jitter so simultaneous failures don't retry in lockstep.
fn backoff_delay(retry: &RetryTuning, attempt: u32) -> Duration {
    let base_ms =
        retry.base_delay_secs as f64 * 1000.0 * retry.growth_factor.powi(attempt as i32 - 1);
    let jitter_ms = if retry.max_jitter_ms > 0 {
        rand::thread_rng().gen_range(0..retry.max_jitter_ms)
    } else {
        0
    };
    Duration::from_millis(base_ms as u64 + jitter_ms)
}

/// Drives one job from `pending` to a terminal state through the
/// external provider, with bounded, cooled-down, backing-off retries.
pub struct RetryController {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn Provider>,
    limiter: Arc<ConcurrencyLimiter>,
    notifier: Arc<dyn Notifier>,
    tuning: Arc<dyn TuningSource>,
}

impl RetryController {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn Provider>,
        limiter: Arc<ConcurrencyLimiter>,
        notifier: Arc<dyn Notifier>,
        tuning: Arc<dyn TuningSource>,
    ) -> Self {
        Self {
            store,
            provider,
            limiter,
            notifier,
            tuning,
        }
    }

    /// Run the job to a terminal outcome. If a lease is given it is
    /// released on every exit path; the caller must not release it
    /// again.
    pub async fn run_with_retry(
        &self,
        job_id: &str,
        lease: Option<Lease>,
    ) -> Result<Job, RetryError> {
        let result = self.drive(job_id, lease.as_ref()).await;

        if let Some(lease) = lease {
            if let Err(e) = self.limiter.release(&lease) {
                // The TTL reclaims the slot eventually either way.
                warn!(job_id, error = %e, "lease release failed");
            }
        }

        result
    }

    async fn drive(&self, job_id: &str, lease: Option<&Lease>) -> Result<Job, RetryError> {
        let mut job = self
            .store
            .get(job_id)?
            .ok_or_else(|| RetryError::NotFound(job_id.to_string()))?;

        let retry = self.tuning.current().retry;

        // A job attempted moments ago is a re-entrant trigger, not a
        // fresh run. First attempts (retry_count == 0) never cool down.
        if job.retry_count > 0 {
            if let Some(last) = job.last_attempt_at {
                let since = (Utc::now() - last).num_seconds();
                if since < retry.cooldown_secs {
                    debug!(job_id = %job.id, since, "rejecting trigger inside cooldown window");
                    return Err(RetryError::CoolingDown { job_id: job.id });
                }
            }
        }

        // Budget already spent (e.g. restored from a previous run):
        // terminal, without burning another provider call.
        if job.retry_count >= retry.max_attempts {
            let message = job
                .error_detail
                .clone()
                .unwrap_or_else(|| "retry budget exhausted".to_string());
            let attempts = job.retry_count;
            job.status = JobStatus::Error;
            job.error_detail = Some(format!("failed after {attempts} attempts: {message}"));
            job.lease_token = None;
            self.store.update(&job)?;
            metrics::JOBS_FAILED.inc();

            self.notifier
                .notify(&job.owner_id, &format!("generation job {} failed", job.id))
                .await;

            return Err(RetryError::Exhausted {
                job_id: job.id,
                attempts,
                message,
            });
        }

        loop {
            // Re-read tuning per attempt so mid-run config changes
            // take effect.
            let retry = self.tuning.current().retry;

            job.retry_count += 1;
            job.last_attempt_at = Some(Utc::now());
            job.status = JobStatus::Processing;
            job.lease_token = lease.map(|l| l.token.clone());
            self.store.update(&job)?;

            let attempt = job.retry_count;
            debug!(job_id = %job.id, attempt, "executing provider call");

            metrics::JOB_ATTEMPTS.inc();
            let timer = metrics::JOB_DURATION_SECONDS.start_timer();
            let outcome = self.provider.execute(&job).await;
            timer.observe_duration();

            match outcome {
                Ok(artifact_ref) => {
                    // Success forgives prior failures.
                    job.status = JobStatus::Done;
                    job.retry_count = 0;
                    job.result_ref = Some(artifact_ref);
                    job.error_detail = None;
                    job.lease_token = None;
                    self.store.update(&job)?;
                    metrics::JOBS_COMPLETED.inc();

                    info!(job_id = %job.id, attempt, "job completed");
                    self.notifier
                        .notify(&job.owner_id, &format!("generation job {} completed", job.id))
                        .await;

                    return Ok(job);
                }

                Err(e) if !e.is_retryable() => {
                    let message = e.message().to_string();
                    job.status = JobStatus::Error;
                    job.error_detail = Some(message.clone());
                    job.lease_token = None;
                    self.store.update(&job)?;
                    metrics::JOBS_FAILED.inc();

                    warn!(job_id = %job.id, fault = ?e.fault(), %message, "terminal failure");
                    self.notifier
                        .notify(&job.owner_id, &format!("generation job {} failed", job.id))
                        .await;

                    return Err(RetryError::Terminal {
                        job_id: job.id.clone(),
                        message,
                    });
                }

                Err(e) => {
                    let message = e.message().to_string();
                    warn!(job_id = %job.id, attempt, fault = ?e.fault(), %message, "attempt failed");

                    if attempt >= retry.max_attempts {
                        job.status = JobStatus::Error;
                        job.error_detail =
                            Some(format!("failed after {attempt} attempts: {message}"));
                        job.lease_token = None;
                        self.store.update(&job)?;
                        metrics::JOBS_FAILED.inc();

                        self.notifier
                            .notify(&job.owner_id, &format!("generation job {} failed", job.id))
                            .await;

                        return Err(RetryError::Exhausted {
                            job_id: job.id.clone(),
                            attempts: attempt,
                            message,
                        });
                    }

                    job.status = JobStatus::Pending;
                    job.error_detail = Some(message);
                    self.store.update(&job)?;

                    let delay = backoff_delay(&retry, attempt);
                    debug!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedTuning;
    use crate::job::{CreateJobRequest, SqliteJobStore};
    use crate::limiter::SqliteLeaseStore;
    use crate::provider::{ProviderError, ProviderFault};
    use crate::testing::{MockProvider, RecordingNotifier};

    struct Harness {
        store: Arc<SqliteJobStore>,
        provider: Arc<MockProvider>,
        limiter: Arc<ConcurrencyLimiter>,
        notifier: Arc<RecordingNotifier>,
        controller: RetryController,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let provider = Arc::new(MockProvider::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let tuning: Arc<SharedTuning> = Arc::new(SharedTuning::default());
        let limiter = Arc::new(ConcurrencyLimiter::new(
            Arc::new(SqliteLeaseStore::in_memory().unwrap()),
            tuning.clone(),
        ));

        let controller = RetryController::new(
            store.clone(),
            provider.clone(),
            limiter.clone(),
            notifier.clone(),
            tuning,
        );

        Harness {
            store,
            provider,
            limiter,
            notifier,
            controller,
        }
    }

    fn pending_job(h: &Harness) -> Job {
        h.store
            .create(CreateJobRequest::single("alice", "standard", "render a sunset"))
            .unwrap()
    }

    fn retryable(message: &str) -> ProviderError {
        ProviderError::with_fault(ProviderFault::ServerError, message)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let h = harness();
        let job = pending_job(&h);
        h.provider.push_success("clip.mp4");

        let done = h.controller.run_with_retry(&job.id, None).await.unwrap();

        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.retry_count, 0);
        assert_eq!(done.result_ref.as_deref(), Some("clip.mp4"));
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_then_success_resets_count() {
        let h = harness();
        let job = pending_job(&h);
        h.provider.push_error(retryable("503 unavailable"));
        h.provider.push_error(retryable("503 unavailable"));
        h.provider.push_success("clip.mp4");

        let done = h.controller.run_with_retry(&job.id, None).await.unwrap();

        // Success forgives the two failed attempts.
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.retry_count, 0);
        assert!(done.error_detail.is_none());
        assert_eq!(h.provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_exhaustion_keeps_last_message() {
        let h = harness();
        let job = pending_job(&h);
        for _ in 0..3 {
            h.provider.push_error(retryable("upstream 502"));
        }

        let result = h.controller.run_with_retry(&job.id, None).await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));

        let stored = h.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(
            stored.error_detail.as_deref(),
            Some("failed after 3 attempts: upstream 502")
        );
    }

    #[tokio::test]
    async fn test_terminal_failure_stops_immediately() {
        let h = harness();
        let job = pending_job(&h);
        h.provider.push_error(ProviderError::with_fault(
            ProviderFault::Timeout,
            "render timed out",
        ));

        let result = h.controller.run_with_retry(&job.id, None).await;
        assert!(matches!(result, Err(RetryError::Terminal { .. })));

        let stored = h.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_detail.as_deref(), Some("render timed out"));
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_budget_already_spent_errors_without_attempting() {
        let h = harness();
        let mut job = pending_job(&h);
        job.retry_count = 3;
        job.error_detail = Some("upstream 502".to_string());
        h.store.update(&job).unwrap();

        let result = h.controller.run_with_retry(&job.id, None).await;
        assert!(matches!(result, Err(RetryError::Exhausted { .. })));

        let stored = h.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cooldown_rejects_reentrant_trigger() {
        let h = harness();
        let mut job = pending_job(&h);
        job.retry_count = 1;
        job.last_attempt_at = Some(Utc::now());
        h.store.update(&job).unwrap();

        let result = h.controller.run_with_retry(&job.id, None).await;
        assert!(matches!(result, Err(RetryError::CoolingDown { .. })));

        // Reject is a no-op: nothing on the row changed.
        let stored = h.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_job_is_not_cooled_down() {
        let h = harness();
        let job = pending_job(&h);
        h.provider.push_success("clip.mp4");

        // retry_count == 0, so a recent created_at does not matter.
        let done = h.controller.run_with_retry(&job.id, None).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_lease_released_on_success_and_failure() {
        let h = harness();

        let shared = SharedTuning::default();
        let mut t = shared.current();
        t.limiter.default_ceiling = 1;
        shared.update(t);
        let limiter = Arc::new(ConcurrencyLimiter::new(
            Arc::new(SqliteLeaseStore::in_memory().unwrap()),
            Arc::new(shared),
        ));
        let controller = RetryController::new(
            h.store.clone(),
            h.provider.clone(),
            limiter.clone(),
            h.notifier.clone(),
            Arc::new(SharedTuning::default()),
        );

        let job = pending_job(&h);
        h.provider.push_success("clip.mp4");
        let lease = limiter.acquire("video_generation", None).unwrap().unwrap();
        controller.run_with_retry(&job.id, Some(lease)).await.unwrap();

        // The only slot is free again.
        assert!(limiter.acquire("video_generation", None).unwrap().is_some());
    }

    #[test]
    fn test_backoff_grows_geometrically() {
        let retry = RetryTuning {
            max_attempts: 5,
            base_delay_secs: 2,
            growth_factor: 2.0,
            cooldown_secs: 30,
            max_jitter_ms: 0,
        };

        assert_eq!(backoff_delay(&retry, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&retry, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&retry, 3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let retry = RetryTuning::default();
        let delay = backoff_delay(&retry, 1);
        let floor = Duration::from_secs(retry.base_delay_secs);
        assert!(delay >= floor);
        assert!(delay < floor + Duration::from_millis(retry.max_jitter_ms));
    }
}
