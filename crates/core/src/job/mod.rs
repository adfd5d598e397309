//! Job records, storage and fair scheduling.

mod scheduler;
mod sqlite_store;
mod store;
mod types;

pub use scheduler::{fair_score, FairScheduler};
pub use sqlite_store::SqliteJobStore;
pub use store::{JobFilter, JobStore, JobStoreError};
pub use types::{CreateJobRequest, GenerationRequest, Job, JobKind, JobStatus};
