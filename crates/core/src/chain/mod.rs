//! Multi-step story chain orchestration.

mod orchestrator;
mod types;

pub use orchestrator::ChainOrchestrator;
pub use types::{ChainError, ChainRequest, ChainRun, ChainStatus};
