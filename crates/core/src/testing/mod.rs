//! Mock collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::job::Job;
use crate::media::{MediaError, MediaTools};
use crate::notify::Notifier;
use crate::provider::{ContinuityAnalyst, Provider, ProviderError};

/// Scripted generation provider. Outcomes are consumed front to back;
/// once the script runs dry, every call succeeds with a fresh
/// artifact reference.
#[derive(Default)]
pub struct MockProvider {
    outcomes: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful outcome with the given artifact reference.
    pub fn push_success(&self, artifact_ref: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Ok(artifact_ref.to_string()));
    }

    /// Queue a failure outcome.
    pub fn push_error(&self, error: ProviderError) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    /// Job ids this provider was called with, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn execute(&self, job: &Job) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(job.id.clone());

        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            return outcome;
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("artifact-{n}"))
    }
}

/// Media tools that fabricate paths instead of touching disk.
#[derive(Default)]
pub struct MockMediaTools {
    /// Remaining fetch failures per artifact reference.
    fetch_failures: Mutex<HashMap<String, u32>>,
    fail_sampling: AtomicBool,
    merges: Mutex<Vec<Vec<PathBuf>>>,
    counter: AtomicU64,
}

impl MockMediaTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` fetches of `artifact_ref` fail.
    pub fn fail_fetch(&self, artifact_ref: &str, times: u32) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(artifact_ref.to_string(), times);
    }

    /// Make all sample extractions fail.
    pub fn fail_sampling(&self) {
        self.fail_sampling.store(true, Ordering::SeqCst);
    }

    /// Merge calls recorded so far, each with its ordered inputs.
    pub fn merges(&self) -> Vec<Vec<PathBuf>> {
        self.merges.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTools for MockMediaTools {
    async fn fetch_local(&self, artifact_ref: &str) -> Result<PathBuf, MediaError> {
        let mut failures = self.fetch_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(artifact_ref) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MediaError::DownloadFailed {
                    reason: format!("scripted fetch failure for {artifact_ref}"),
                });
            }
        }

        Ok(PathBuf::from(format!(
            "/mock/{}",
            artifact_ref.replace('/', "_")
        )))
    }

    async fn extract_representative_sample(
        &self,
        artifact_path: &Path,
    ) -> Result<PathBuf, MediaError> {
        if self.fail_sampling.load(Ordering::SeqCst) {
            return Err(MediaError::operation_failed("scripted sampling failure"));
        }
        Ok(artifact_path.with_extension("jpg"))
    }

    async fn merge(&self, ordered_paths: &[PathBuf]) -> Result<PathBuf, MediaError> {
        if ordered_paths.is_empty() {
            return Err(MediaError::operation_failed("nothing to merge"));
        }
        self.merges.lock().unwrap().push(ordered_paths.to_vec());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from(format!("/mock/merged-{n}.mp4")))
    }
}

/// Continuity analyst that tags instructions, or fails on demand.
#[derive(Default)]
pub struct MockAnalyst {
    fail: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockAnalyst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContinuityAnalyst for MockAnalyst {
    async fn refine_instruction(
        &self,
        instruction: &str,
        _sample_path: &str,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(instruction.to_string());

        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::from_text("continuity analysis unavailable"));
        }
        Ok(format!("{instruction} (continuous with previous shot)"))
    }
}

/// Notifier that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, owner_id: &str, status_text: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((owner_id.to_string(), status_text.to_string()));
    }
}
