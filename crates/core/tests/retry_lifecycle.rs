//! Job lifecycle integration tests.
//!
//! These tests run jobs through the real dispatch path against a
//! file-backed store: submit -> fair ordering -> lease admission ->
//! retry-controlled execution -> review / recovery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use reelforge_core::{
    create_review_queue,
    testing::{MockProvider, RecordingNotifier},
    ConcurrencyLimiter, CreateJobRequest, JobQueue, JobStatus, JobStore, Notifier, ProviderError,
    ProviderFault, RetryController, Reviewer, SharedTuning, SqliteJobStore, SqliteLeaseStore,
    TuningSource, ZombieSweeper,
};

/// Test helper wiring every component over one database file.
struct TestHarness {
    store: Arc<SqliteJobStore>,
    provider: Arc<MockProvider>,
    notifier: Arc<RecordingNotifier>,
    limiter: Arc<ConcurrencyLimiter>,
    controller: Arc<RetryController>,
    tuning: Arc<SharedTuning>,
    db_path: std::path::PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let shared = SharedTuning::default();
        let mut tuning = shared.current();
        tuning.review.inter_task_delay_ms = 1;
        shared.update(tuning);
        let tuning = Arc::new(shared);

        let store = Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let lease_store =
            Arc::new(SqliteLeaseStore::new(&db_path).expect("Failed to create lease store"));
        let provider = Arc::new(MockProvider::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let limiter = Arc::new(ConcurrencyLimiter::new(lease_store, tuning.clone()));
        let controller = Arc::new(RetryController::new(
            store.clone(),
            provider.clone(),
            limiter.clone(),
            notifier.clone() as Arc<dyn Notifier>,
            tuning.clone(),
        ));

        Self {
            store,
            provider,
            notifier,
            limiter,
            controller,
            tuning,
            db_path,
            _temp_dir: temp_dir,
        }
    }

    fn queue(&self) -> JobQueue {
        JobQueue::new(
            self.store.clone(),
            self.limiter.clone(),
            self.controller.clone(),
            None,
            self.tuning.clone(),
        )
    }

    fn sweeper(&self) -> ZombieSweeper {
        ZombieSweeper::new(self.store.clone(), self.limiter.clone(), self.tuning.clone())
    }
}

/// Reviewer that approves everything.
struct ApproveAll;

#[async_trait::async_trait]
impl Reviewer for ApproveAll {
    async fn review(&self, _job_id: &str, artifact_ref: &str) -> Result<String, ProviderError> {
        Ok(format!("approved: {artifact_ref}"))
    }
}

#[tokio::test]
async fn test_submitted_job_runs_to_done_and_gets_reviewed() {
    let harness = TestHarness::new();
    harness.provider.push_success("sunset.mp4");

    let (review_handle, review_worker) = create_review_queue(
        Arc::new(ApproveAll),
        harness.store.clone(),
        harness.tuning.clone(),
    );
    let queue = JobQueue::new(
        harness.store.clone(),
        harness.limiter.clone(),
        harness.controller.clone(),
        Some(review_handle),
        harness.tuning.clone(),
    );

    let job = queue
        .submit(CreateJobRequest::single("alice", "standard", "render a sunset"))
        .unwrap();

    for handle in queue.dispatch_once().unwrap() {
        handle.await.unwrap();
    }

    let stored = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Done);
    assert_eq!(stored.result_ref.as_deref(), Some("sunset.mp4"));

    // Closing every handle lets the worker drain and exit.
    drop(queue);
    review_worker.run().await;

    let reviewed = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(reviewed.review.as_deref(), Some("approved: sunset.mp4"));

    // The owner heard about the completion.
    assert!(!harness.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_terminal_error_is_never_resurrected() {
    let harness = TestHarness::new();
    harness.provider.push_error(ProviderError::with_fault(
        ProviderFault::Timeout,
        "render timed out",
    ));

    let queue = harness.queue();
    let job = queue
        .submit(CreateJobRequest::single("alice", "standard", "render"))
        .unwrap();

    for handle in queue.dispatch_once().unwrap() {
        handle.await.unwrap();
    }

    let stored = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Error);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.error_detail.as_deref(), Some("render timed out"));

    // Age the row far past the staleness window; the sweeper still
    // wants nothing to do with it because it is not processing.
    let mut aged = stored.clone();
    aged.last_attempt_at = Some(Utc::now() - chrono::Duration::seconds(3600));
    harness.store.update(&aged).unwrap();

    let sweeper = harness.sweeper();
    assert_eq!(sweeper.sweep_once().unwrap(), 0);
    assert_eq!(sweeper.recover_startup().unwrap(), 0);

    let after = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Error);
    assert_eq!(after.retry_count, 1);

    // Nor does the dispatcher pick it up again.
    assert!(queue.dispatch_once().unwrap().is_empty());
    assert_eq!(harness.provider.call_count(), 1);
}

#[tokio::test]
async fn test_retry_budget_survives_process_restart() {
    let harness = TestHarness::new();

    let queue = harness.queue();
    let mut job = queue
        .submit(CreateJobRequest::single("alice", "standard", "render"))
        .unwrap();

    // A previous run spent the whole budget before dying.
    job.retry_count = 3;
    job.error_detail = Some("upstream 502".to_string());
    harness.store.update(&job).unwrap();

    // "Restart": a fresh store over the same database file.
    let store2 = Arc::new(SqliteJobStore::new(&harness.db_path).unwrap());
    let controller = RetryController::new(
        store2.clone(),
        harness.provider.clone(),
        harness.limiter.clone(),
        harness.notifier.clone() as Arc<dyn Notifier>,
        harness.tuning.clone(),
    );

    let result = controller.run_with_retry(&job.id, None).await;
    assert!(result.is_err());

    let stored = store2.get(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Error);
    assert_eq!(
        stored.error_detail.as_deref(),
        Some("failed after 3 attempts: upstream 502")
    );
    // No provider call was spent on the dead job.
    assert_eq!(harness.provider.call_count(), 0);
}

#[tokio::test]
async fn test_zombie_is_recovered_and_completes() {
    let harness = TestHarness::new();

    let queue = harness.queue();
    let mut job = queue
        .submit(CreateJobRequest::single("alice", "standard", "render"))
        .unwrap();

    // Simulate a process that died one attempt in, lease still held.
    let lease = harness
        .limiter
        .acquire("video_generation", Some("alice"))
        .unwrap()
        .unwrap();
    job.status = JobStatus::Processing;
    job.retry_count = 1;
    job.last_attempt_at = Some(Utc::now() - chrono::Duration::seconds(600));
    job.lease_token = Some(lease.token.clone());
    harness.store.update(&job).unwrap();

    let sweeper = harness.sweeper();
    assert_eq!(sweeper.sweep_once().unwrap(), 1);

    let recovered = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Pending);
    // The interrupted attempt was free.
    assert_eq!(recovered.retry_count, 1);
    assert!(recovered.lease_token.is_none());

    // The recovered job goes through dispatch like any other.
    harness.provider.push_success("recovered.mp4");
    for handle in queue.dispatch_once().unwrap() {
        handle.await.unwrap();
    }

    let done = harness.store.get(&job.id).unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.result_ref.as_deref(), Some("recovered.mp4"));
}

#[tokio::test]
async fn test_saturated_category_defers_jobs_until_release() {
    let harness = TestHarness::new();

    let shared = SharedTuning::default();
    let mut tuning = shared.current();
    tuning.limiter.default_ceiling = 1;
    shared.update(tuning);
    let tuning = Arc::new(shared);

    let limiter = Arc::new(ConcurrencyLimiter::new(
        Arc::new(SqliteLeaseStore::in_memory().unwrap()),
        tuning.clone(),
    ));
    let controller = Arc::new(RetryController::new(
        harness.store.clone(),
        harness.provider.clone(),
        limiter.clone(),
        harness.notifier.clone() as Arc<dyn Notifier>,
        tuning.clone(),
    ));
    let queue = JobQueue::new(harness.store.clone(), limiter.clone(), controller, None, tuning);

    queue
        .submit(CreateJobRequest::single("alice", "standard", "one"))
        .unwrap();
    queue
        .submit(CreateJobRequest::single("bob", "standard", "two"))
        .unwrap();

    // An outside holder saturates the category.
    let held = limiter.acquire("video_generation", None).unwrap().unwrap();
    assert!(queue.dispatch_once().unwrap().is_empty());

    limiter.release(&held).unwrap();
    let handles = queue.dispatch_once().unwrap();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.unwrap();
    }
}
