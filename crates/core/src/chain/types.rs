//! Story chain data types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where a chain run currently is.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainStatus {
    /// Submitted, waiting for a lease.
    Preprocessing,
    /// Generating shot `step` of `total`.
    Processing { step: u32, total: u32 },
    /// All shots produced, concatenating.
    Merging,
    Completed,
    Failed { step: u32, message: String },
}

impl ChainStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainStatus::Completed | ChainStatus::Failed { .. })
    }
}

/// In-memory progress of one chain, polled by callers.
///
/// Lives only as long as the owning orchestrator instance; a process
/// restart loses in-flight chain status (the merged result, once
/// written, survives as a job row).
#[derive(Debug, Clone, Serialize)]
pub struct ChainRun {
    pub chain_id: String,
    pub owner_id: String,
    pub status: ChainStatus,

    /// Job ids of the successfully produced steps, in order.
    pub step_job_ids: Vec<String>,

    /// Job id of the merged composite result, once completed.
    pub merged_job_id: Option<String>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainRun {
    pub fn new(chain_id: &str, owner_id: &str) -> Self {
        let now = Utc::now();
        Self {
            chain_id: chain_id.to_string(),
            owner_id: owner_id.to_string(),
            status: ChainStatus::Preprocessing,
            step_job_ids: Vec::new(),
            merged_job_id: None,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Request to run a story chain.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub owner_id: String,
    pub owner_class: String,

    /// Ordered shot instructions, one per step.
    pub steps: Vec<String>,

    /// Reference artifact shared by every step.
    pub reference_artifact: Option<String>,

    pub shared: bool,
}

impl ChainRequest {
    pub fn new(
        owner_id: impl Into<String>,
        owner_class: impl Into<String>,
        steps: Vec<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            owner_class: owner_class.into(),
            steps,
            reference_artifact: None,
            shared: false,
        }
    }

    pub fn with_reference(mut self, artifact: impl Into<String>) -> Self {
        self.reference_artifact = Some(artifact.into());
        self
    }
}

/// Error type for chain submission.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A chain needs at least one step.
    #[error("Chain has no steps")]
    NoSteps,

    /// No chain with that id on this instance.
    #[error("Chain not found: {0}")]
    NotFound(String),
}
