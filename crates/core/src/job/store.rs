//! Job storage trait and query types.

use chrono::{DateTime, Utc};

use super::types::{CreateJobRequest, Job, JobKind, JobStatus};

/// Error type for job store operations.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub owner_id: Option<String>,
    pub kind: Option<JobKind>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            owner_id: None,
            kind: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// Rows are the single source of truth for job state. Writers follow
/// read-then-write on whole rows; the retry controller and sweeper
/// never drive the same job's transitions concurrently (the sweeper
/// only touches jobs it has verified are stale).
pub trait JobStore: Send + Sync {
    /// Create a new pending job.
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    /// List jobs matching the filter, ordered by creation time.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Write back a mutated job row (last writer wins).
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Record a quality-review verdict without touching the rest of
    /// the row.
    fn set_review(&self, id: &str, review: &str) -> Result<(), JobStoreError>;

    /// Processing jobs whose last attempt started before the cutoff.
    /// With `None`, every processing job matches (startup recovery).
    fn list_stale_processing(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Permanently delete a job. Returns the deleted job if found.
    fn delete(&self, id: &str) -> Result<Job, JobStoreError>;
}
