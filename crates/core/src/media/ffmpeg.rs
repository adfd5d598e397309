//! FFmpeg-based media tools implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::error::MediaError;
use super::MediaTools;

/// Settings for local media processing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Scratch directory for downloads, samples and merge outputs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("reelforge")
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            work_dir: default_work_dir(),
        }
    }
}

/// FFmpeg-based media tools.
pub struct FfmpegMediaTools {
    config: MediaConfig,
    client: reqwest::Client,
}

impl FfmpegMediaTools {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MediaConfig::default())
    }

    /// Grab one frame near the end of the clip. The tail frame is what
    /// the next step has to stay visually continuous with.
    fn build_sample_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-sseof".to_string(),
            "-1".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-update".to_string(),
            "1".to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    /// Concat demuxer over a list file; streams are copied, not
    /// re-encoded, so step artifacts must share a codec (they do, all
    /// coming from the same provider).
    fn build_merge_args(list_file: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_file.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<(), MediaError> {
        let output = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MediaError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    MediaError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(MediaError::operation_failed(format!(
                "ffmpeg exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl MediaTools for FfmpegMediaTools {
    async fn fetch_local(&self, artifact_ref: &str) -> Result<PathBuf, MediaError> {
        // Already on disk? Nothing to fetch.
        let as_path = Path::new(artifact_ref);
        if as_path.exists() {
            return Ok(as_path.to_path_buf());
        }

        if !artifact_ref.starts_with("http://") && !artifact_ref.starts_with("https://") {
            return Err(MediaError::InputNotFound {
                path: as_path.to_path_buf(),
            });
        }

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let local = self
            .config
            .work_dir
            .join(format!("{}.mp4", uuid::Uuid::new_v4()));

        debug!(%artifact_ref, local = %local.display(), "downloading artifact");

        let response = self
            .client
            .get(artifact_ref)
            .send()
            .await
            .map_err(|e| MediaError::DownloadFailed {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MediaError::DownloadFailed {
                reason: format!("server returned {}", response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| MediaError::DownloadFailed {
            reason: e.to_string(),
        })?;

        if bytes.is_empty() {
            return Err(MediaError::DownloadFailed {
                reason: "empty artifact body".to_string(),
            });
        }

        tokio::fs::write(&local, &bytes).await?;
        Ok(local)
    }

    async fn extract_representative_sample(
        &self,
        artifact_path: &Path,
    ) -> Result<PathBuf, MediaError> {
        if !artifact_path.exists() {
            return Err(MediaError::InputNotFound {
                path: artifact_path.to_path_buf(),
            });
        }

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let sample = self
            .config
            .work_dir
            .join(format!("{}.jpg", uuid::Uuid::new_v4()));

        self.run_ffmpeg(&Self::build_sample_args(artifact_path, &sample))
            .await?;

        if !sample.exists() {
            return Err(MediaError::operation_failed("sample frame not created"));
        }

        Ok(sample)
    }

    async fn merge(&self, ordered_paths: &[PathBuf]) -> Result<PathBuf, MediaError> {
        if ordered_paths.is_empty() {
            return Err(MediaError::operation_failed("nothing to merge"));
        }

        for path in ordered_paths {
            if !path.exists() {
                return Err(MediaError::InputNotFound { path: path.clone() });
            }
        }

        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let merge_id = uuid::Uuid::new_v4();
        let list_file = self.config.work_dir.join(format!("{merge_id}.txt"));
        let merged = self.config.work_dir.join(format!("{merge_id}.mp4"));

        let mut list = String::new();
        for path in ordered_paths {
            list.push_str(&format!("file '{}'\n", path.display()));
        }
        tokio::fs::write(&list_file, list).await?;

        let result = self.run_ffmpeg(&Self::build_merge_args(&list_file, &merged)).await;
        let _ = tokio::fs::remove_file(&list_file).await;
        result?;

        if !merged.exists() {
            return Err(MediaError::operation_failed("merged file not created"));
        }

        Ok(merged)
    }
}
