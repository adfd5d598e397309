//! Local media processing: artifact retrieval, frame sampling, merge.

mod error;
mod ffmpeg;

pub use error::MediaError;
pub use ffmpeg::{FfmpegMediaTools, MediaConfig};

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Local media operations the orchestrator needs between and after
/// pipeline steps.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Materialize an artifact reference (remote URL or local path) as
    /// a local file.
    async fn fetch_local(&self, artifact_ref: &str) -> Result<PathBuf, MediaError>;

    /// Extract a single frame that represents where the clip ends.
    async fn extract_representative_sample(
        &self,
        artifact_path: &Path,
    ) -> Result<PathBuf, MediaError>;

    /// Concatenate artifacts, in the given order, into one file.
    async fn merge(&self, ordered_paths: &[PathBuf]) -> Result<PathBuf, MediaError>;
}
