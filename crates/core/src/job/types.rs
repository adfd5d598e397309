//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of work a job represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A standalone render.
    Single,
    /// One shot of a story chain.
    PipelineStep,
}

impl JobKind {
    /// Lease category this kind of job is admitted under.
    pub fn category(&self) -> &'static str {
        match self {
            JobKind::Single => "video_generation",
            JobKind::PipelineStep => "video_generation",
        }
    }

    /// Kind as a string (for filtering).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Single => "single",
            JobKind::PipelineStep => "pipeline_step",
        }
    }
}

/// Job status lifecycle.
///
/// ```text
/// pending -> processing -> done
///                |-> pending (retryable failure, attempts remain)
///                |-> error   (terminal failure or budget exhausted)
/// done/error -> archived (retention, outside the orchestrator)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
    Archived,
}

impl JobStatus {
    /// Returns true if no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Archived)
    }

    /// Status as a string (for filtering).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Archived => "archived",
        }
    }
}

/// The payload handed to the provider. The orchestrator never
/// interprets it beyond passing it through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    /// Freeform instruction for the generation call.
    pub instruction: String,

    /// Optional reference artifact shared by all steps of a chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_artifact: Option<String>,
}

impl GenerationRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            reference_artifact: None,
        }
    }

    pub fn with_reference(mut self, artifact: impl Into<String>) -> Self {
        self.reference_artifact = Some(artifact.into());
        self
    }
}

/// One schedulable unit of generation work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique identifier (UUID).
    pub id: String,

    pub kind: JobKind,

    /// Owner identity (from the caller-facing surface).
    pub owner_id: String,

    /// Owner class, mapped to a scheduling base weight.
    pub owner_class: String,

    pub status: JobStatus,

    /// Attempts consumed so far. Persisted so the max-attempts ceiling
    /// survives process restarts.
    pub retry_count: u32,

    /// When the last attempt started. None until the first attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Provider payload.
    pub request: GenerationRequest,

    /// Reference to the produced artifact, once done.
    pub result_ref: Option<String>,

    /// Last human-readable failure reason.
    pub error_detail: Option<String>,

    /// Whether the result is visible beyond its owner.
    pub shared: bool,

    /// Marks a merged chain result, so retention logic that prunes
    /// intermediate step outputs leaves it alone.
    pub composite: bool,

    /// Token of the concurrency lease held while processing.
    pub lease_token: Option<String>,

    /// Secondary quality-review verdict, written by the review queue.
    pub review: Option<String>,
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub kind: JobKind,
    pub owner_id: String,
    pub owner_class: String,
    pub request: GenerationRequest,
    pub shared: bool,
}

impl CreateJobRequest {
    pub fn single(
        owner_id: impl Into<String>,
        owner_class: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            kind: JobKind::Single,
            owner_id: owner_id.into(),
            owner_class: owner_class.into(),
            request: GenerationRequest::new(instruction),
            shared: false,
        }
    }
}
