//! Upstream generation provider interface.

mod error;
mod http;

pub use error::{ProviderError, ProviderFault};
pub use http::{HttpProvider, HttpProviderConfig};

use async_trait::async_trait;

use crate::job::Job;

/// One opaque generation call. The orchestrator never interprets the
/// produced content, only the outcome: an artifact reference, a
/// retryable failure, or a terminal one.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<String, ProviderError>;
}

/// Rewrites a step instruction so the next shot stays visually
/// consistent with the previous one, given a representative sample of
/// the prior artifact. Failures here are non-fatal; callers fall back
/// to the original instruction.
#[async_trait]
pub trait ContinuityAnalyst: Send + Sync {
    async fn refine_instruction(
        &self,
        instruction: &str,
        sample_path: &str,
    ) -> Result<String, ProviderError>;
}
