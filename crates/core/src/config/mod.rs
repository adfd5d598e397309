//! Configuration loading and runtime tuning.

mod loader;
mod tuning;
mod types;

pub use loader::{load_config, load_config_from_str};
pub use tuning::{SharedTuning, TuningSource};
pub use types::{
    ChainTuning, Config, DatabaseConfig, LimiterTuning, QueueTuning, RetryTuning, ReviewTuning,
    SchedulerTuning, SweeperTuning, Tuning,
};

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist.
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// Config file could not be parsed.
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
