pub mod chain;
pub mod config;
pub mod job;
pub mod limiter;
pub mod media;
pub mod metrics;
pub mod notify;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod review;
pub mod sweeper;
pub mod testing;

pub use chain::{ChainError, ChainOrchestrator, ChainRequest, ChainRun, ChainStatus};
pub use config::{
    load_config, load_config_from_str, Config, ConfigError, SharedTuning, Tuning, TuningSource,
};
pub use job::{
    CreateJobRequest, FairScheduler, GenerationRequest, Job, JobFilter, JobKind, JobStatus,
    JobStore, JobStoreError, SqliteJobStore,
};
pub use limiter::{ConcurrencyLimiter, Lease, LeaseStore, LimiterError, SqliteLeaseStore};
pub use media::{FfmpegMediaTools, MediaConfig, MediaError, MediaTools};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use provider::{
    ContinuityAnalyst, HttpProvider, HttpProviderConfig, Provider, ProviderError, ProviderFault,
};
pub use queue::JobQueue;
pub use retry::{RetryController, RetryError};
pub use review::{create_review_queue, ReviewHandle, ReviewTask, ReviewWorker, Reviewer};
pub use sweeper::ZombieSweeper;
