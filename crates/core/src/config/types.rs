use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tuning: Tuning,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reelforge.db")
}

/// Orchestration constants that may change while the process is running.
///
/// Components hold a [`super::TuningSource`] and re-read the relevant
/// section on every admission or retry decision, so edits take effect
/// without a restart.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Tuning {
    #[serde(default)]
    pub limiter: LimiterTuning,
    #[serde(default)]
    pub retry: RetryTuning,
    #[serde(default)]
    pub sweeper: SweeperTuning,
    #[serde(default)]
    pub scheduler: SchedulerTuning,
    #[serde(default)]
    pub queue: QueueTuning,
    #[serde(default)]
    pub chain: ChainTuning,
    #[serde(default)]
    pub review: ReviewTuning,
}

/// Concurrency limiter ceilings and lease expiry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimiterTuning {
    /// Ceiling for categories without an explicit entry.
    #[serde(default = "default_category_ceiling")]
    pub default_ceiling: u32,

    /// Per-category global ceilings (e.g. "video_generation" = 4).
    #[serde(default)]
    pub category_ceilings: HashMap<String, u32>,

    /// Additional ceiling applied per (category, owner) pair.
    #[serde(default = "default_owner_ceiling")]
    pub per_owner_ceiling: u32,

    /// Lease time-to-live. A holder that crashes without releasing
    /// loses its slot after this long.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Poll interval for blocking acquisition.
    #[serde(default = "default_acquire_poll")]
    pub acquire_poll_secs: u64,
}

fn default_category_ceiling() -> u32 {
    4
}

fn default_owner_ceiling() -> u32 {
    2
}

fn default_lease_ttl() -> u64 {
    420 // 7 minutes, comfortably above the longest provider call
}

fn default_acquire_poll() -> u64 {
    5
}

impl Default for LimiterTuning {
    fn default() -> Self {
        Self {
            default_ceiling: default_category_ceiling(),
            category_ceilings: HashMap::new(),
            per_owner_ceiling: default_owner_ceiling(),
            lease_ttl_secs: default_lease_ttl(),
            acquire_poll_secs: default_acquire_poll(),
        }
    }
}

impl LimiterTuning {
    /// Ceiling for a category, falling back to the default.
    pub fn ceiling_for(&self, category: &str) -> u32 {
        self.category_ceilings
            .get(category)
            .copied()
            .unwrap_or(self.default_ceiling)
    }
}

/// Retry controller policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryTuning {
    /// Maximum attempts before a job is terminally errored.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay, grown geometrically per attempt.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    /// Backoff growth factor.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    /// A job re-triggered within this window of its last attempt is
    /// rejected as a duplicate (no state change).
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: i64,

    /// Upper bound on random jitter added to each backoff delay.
    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    5
}

fn default_growth_factor() -> f64 {
    2.0
}

fn default_cooldown() -> i64 {
    30
}

fn default_max_jitter() -> u64 {
    1000
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            growth_factor: default_growth_factor(),
            cooldown_secs: default_cooldown(),
            max_jitter_ms: default_max_jitter(),
        }
    }
}

/// Zombie sweeper cadence and staleness threshold.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweeperTuning {
    /// How often the sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// A processing job whose last attempt is older than this is
    /// considered abandoned by a dead process.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: i64,
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_stale_after() -> i64 {
    300
}

impl Default for SweeperTuning {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

/// Fair scheduler owner-class weights.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerTuning {
    /// Base weight per owner class; lower classes are served first
    /// while fresh. Wait time erodes the weight linearly.
    #[serde(default)]
    pub class_weights: HashMap<String, i64>,

    /// Weight for classes without an explicit entry.
    #[serde(default = "default_class_weight")]
    pub default_weight: i64,
}

fn default_class_weight() -> i64 {
    600
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            class_weights: HashMap::new(),
            default_weight: default_class_weight(),
        }
    }
}

impl SchedulerTuning {
    /// Base weight for an owner class, falling back to the default.
    pub fn weight_for(&self, class: &str) -> i64 {
        self.class_weights
            .get(class)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

/// Dispatch loop cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueTuning {
    /// How often the dispatch loop scans for pending jobs.
    #[serde(default = "default_dispatch_poll")]
    pub poll_interval_ms: u64,

    /// How many pending jobs to consider per scan.
    #[serde(default = "default_dispatch_batch")]
    pub batch_size: i64,
}

fn default_dispatch_poll() -> u64 {
    1000
}

fn default_dispatch_batch() -> i64 {
    20
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_dispatch_poll(),
            batch_size: default_dispatch_batch(),
        }
    }
}

/// Story chain driver settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainTuning {
    /// Pipeline-local attempts per step, on top of the per-job retry
    /// budget. Covers failures the job never sees, like an artifact
    /// that cannot be fetched after a nominally successful render.
    #[serde(default = "default_step_attempts")]
    pub step_attempts: u32,

    /// Base delay between pipeline-local attempts; escalates with the
    /// attempt number.
    #[serde(default = "default_step_retry_base")]
    pub step_retry_base_secs: u64,

    /// Lease category used for the whole chain.
    #[serde(default = "default_chain_category")]
    pub lease_category: String,

    /// How long a chain submission waits for a lease before giving up.
    #[serde(default = "default_chain_admit_timeout")]
    pub admit_timeout_secs: u64,
}

fn default_step_attempts() -> u32 {
    3
}

fn default_step_retry_base() -> u64 {
    2
}

fn default_chain_category() -> String {
    "story_chain".to_string()
}

fn default_chain_admit_timeout() -> u64 {
    600
}

impl Default for ChainTuning {
    fn default() -> Self {
        Self {
            step_attempts: default_step_attempts(),
            step_retry_base_secs: default_step_retry_base(),
            lease_category: default_chain_category(),
            admit_timeout_secs: default_chain_admit_timeout(),
        }
    }
}

/// Review queue pacing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewTuning {
    /// Fixed delay between review tasks, to respect the downstream
    /// rate limit.
    #[serde(default = "default_review_delay")]
    pub inter_task_delay_ms: u64,

    /// Channel buffer; enqueue blocks when full.
    #[serde(default = "default_review_buffer")]
    pub buffer_size: usize,
}

fn default_review_delay() -> u64 {
    1500
}

fn default_review_buffer() -> usize {
    64
}

impl Default for ReviewTuning {
    fn default() -> Self {
        Self {
            inter_task_delay_ms: default_review_delay(),
            buffer_size: default_review_buffer(),
        }
    }
}
