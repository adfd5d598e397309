//! Media tooling errors.

use std::path::PathBuf;

/// Error type for local media operations.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// ffmpeg binary not found.
    #[error("ffmpeg not found at: {path}")]
    FfmpegNotFound { path: String },

    /// Input file does not exist.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// Downloading a remote artifact failed.
    #[error("Artifact download failed: {reason}")]
    DownloadFailed { reason: String },

    /// An ffmpeg invocation exited unsuccessfully.
    #[error("Media operation failed: {reason}")]
    OperationFailed { reason: String },

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn operation_failed(reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            reason: reason.into(),
        }
    }
}
