//! Story chain driver.
//!
//! A chain is an ordered sequence of dependent shots: each step's
//! artifact seeds the continuity analysis for the next step's
//! instruction, and the final artifacts are concatenated into one
//! composite result. The whole chain runs under a single concurrency
//! lease, not one per step, so a long chain cannot starve itself
//! midway through.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::TuningSource;
use crate::job::{CreateJobRequest, JobKind, JobStatus, JobStore, GenerationRequest};
use crate::limiter::ConcurrencyLimiter;
use crate::media::MediaTools;
use crate::metrics;
use crate::notify::Notifier;
use crate::provider::ContinuityAnalyst;
use crate::retry::RetryController;

use super::types::{ChainError, ChainRequest, ChainRun, ChainStatus};

/// Output of one successful step: the job that produced it and the
/// artifact's local copy.
struct StepOutput {
    job_id: String,
    local_path: PathBuf,
}

/// Runs story chains and tracks their progress.
///
/// The status board is owned by the instance, not process-global, so
/// separate orchestrators (tests, sharded deployments) never share
/// state.
pub struct ChainOrchestrator {
    store: Arc<dyn JobStore>,
    controller: Arc<RetryController>,
    limiter: Arc<ConcurrencyLimiter>,
    media: Arc<dyn MediaTools>,
    analyst: Arc<dyn ContinuityAnalyst>,
    notifier: Arc<dyn Notifier>,
    tuning: Arc<dyn TuningSource>,

    runs: RwLock<HashMap<String, ChainRun>>,
}

impl ChainOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        controller: Arc<RetryController>,
        limiter: Arc<ConcurrencyLimiter>,
        media: Arc<dyn MediaTools>,
        analyst: Arc<dyn ContinuityAnalyst>,
        notifier: Arc<dyn Notifier>,
        tuning: Arc<dyn TuningSource>,
    ) -> Self {
        Self {
            store,
            controller,
            limiter,
            media,
            analyst,
            notifier,
            tuning,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Submit a chain. Returns its id immediately; the chain runs in a
    /// spawned task and progress is polled via [`Self::status`].
    pub async fn submit(self: &Arc<Self>, request: ChainRequest) -> Result<String, ChainError> {
        if request.steps.is_empty() {
            return Err(ChainError::NoSteps);
        }

        let chain_id = uuid::Uuid::new_v4().to_string();
        self.runs
            .write()
            .await
            .insert(chain_id.clone(), ChainRun::new(&chain_id, &request.owner_id));

        metrics::CHAINS_STARTED.inc();
        info!(%chain_id, steps = request.steps.len(), "chain submitted");

        let orchestrator = Arc::clone(self);
        let id = chain_id.clone();
        tokio::spawn(async move {
            orchestrator.drive(&id, request).await;
        });

        Ok(chain_id)
    }

    /// Current progress of a chain, if this instance knows it.
    pub async fn status(&self, chain_id: &str) -> Option<ChainRun> {
        self.runs.read().await.get(chain_id).cloned()
    }

    /// Drop a terminal chain from the status board.
    pub async fn forget(&self, chain_id: &str) -> Result<(), ChainError> {
        let mut runs = self.runs.write().await;
        match runs.get(chain_id) {
            Some(run) if run.status.is_terminal() => {
                runs.remove(chain_id);
                Ok(())
            }
            Some(_) => Err(ChainError::NotFound(chain_id.to_string())),
            None => Err(ChainError::NotFound(chain_id.to_string())),
        }
    }

    async fn update_run(&self, chain_id: &str, f: impl FnOnce(&mut ChainRun)) {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(chain_id) {
            f(run);
            run.updated_at = Utc::now();
        }
    }

    async fn drive(self: Arc<Self>, chain_id: &str, request: ChainRequest) {
        let chain = self.tuning.current().chain;

        let lease = match self
            .limiter
            .acquire_with_wait(
                &chain.lease_category,
                Some(&request.owner_id),
                Duration::from_secs(chain.admit_timeout_secs),
            )
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                warn!(%chain_id, "chain could not be admitted before the timeout");
                self.fail(chain_id, &request, 0, "no capacity available within the admission timeout")
                    .await;
                return;
            }
            Err(e) => {
                self.fail(chain_id, &request, 0, &format!("lease acquisition failed: {e}"))
                    .await;
                return;
            }
        };

        let outcome = self.run_steps(chain_id, &request).await;

        if let Err(e) = self.limiter.release(&lease) {
            warn!(%chain_id, error = %e, "chain lease release failed");
        }

        match outcome {
            Ok(merged_job_id) => {
                self.update_run(chain_id, |run| {
                    run.status = ChainStatus::Completed;
                    run.merged_job_id = Some(merged_job_id);
                })
                .await;
                metrics::CHAINS_COMPLETED.inc();
                info!(%chain_id, "chain completed");
                self.notifier
                    .notify(&request.owner_id, &format!("story chain {chain_id} completed"))
                    .await;
            }
            Err((step, message)) => {
                self.fail(chain_id, &request, step, &message).await;
            }
        }
    }

    async fn fail(&self, chain_id: &str, request: &ChainRequest, step: u32, message: &str) {
        warn!(%chain_id, step, message, "chain failed");
        self.update_run(chain_id, |run| {
            run.status = ChainStatus::Failed {
                step,
                message: message.to_string(),
            };
        })
        .await;
        metrics::CHAINS_FAILED.inc();
        self.notifier
            .notify(
                &request.owner_id,
                &format!("story chain {chain_id} failed at step {step}: {message}"),
            )
            .await;
    }

    /// Run every step, then merge. Returns the merged job id, or the
    /// failing step number (1-based) with its message.
    async fn run_steps(
        &self,
        chain_id: &str,
        request: &ChainRequest,
    ) -> Result<String, (u32, String)> {
        let total = request.steps.len() as u32;
        let mut outputs: Vec<StepOutput> = Vec::with_capacity(request.steps.len());

        for (index, instruction) in request.steps.iter().enumerate() {
            let step = index as u32 + 1;
            self.update_run(chain_id, |run| {
                run.status = ChainStatus::Processing { step, total };
            })
            .await;

            // From the second step on, rewrite the instruction around
            // a sample of the previous shot. Any failure here degrades
            // to the unmodified instruction; continuity is best effort.
            let instruction = match outputs.last() {
                Some(previous) => {
                    self.continuity_instruction(chain_id, instruction, &previous.local_path)
                        .await
                }
                None => instruction.clone(),
            };

            let output = self
                .run_one_step(chain_id, request, step, &instruction)
                .await
                .map_err(|message| (step, message))?;

            self.update_run(chain_id, |run| {
                run.step_job_ids.push(output.job_id.clone());
            })
            .await;
            outputs.push(output);
        }

        self.update_run(chain_id, |run| {
            run.status = ChainStatus::Merging;
        })
        .await;

        let paths: Vec<PathBuf> = outputs.iter().map(|o| o.local_path.clone()).collect();
        let merged = self
            .media
            .merge(&paths)
            .await
            .map_err(|e| (total, format!("merge failed: {e}")))?;

        self.record_composite(request, &merged)
            .await
            .map_err(|e| (total, format!("failed to record merged result: {e}")))
    }

    /// One step, with its own bounded retry loop on top of the per-job
    /// retry budget. Each attempt is a fresh job: the previous
    /// attempt's row keeps its terminal state for the record, and a
    /// fresh row cannot inherit a cooldown or a spent budget.
    async fn run_one_step(
        &self,
        chain_id: &str,
        request: &ChainRequest,
        step: u32,
        instruction: &str,
    ) -> Result<StepOutput, String> {
        let chain = self.tuning.current().chain;
        let mut last_error = String::new();

        for attempt in 1..=chain.step_attempts {
            if attempt > 1 {
                let delay =
                    Duration::from_secs(chain.step_retry_base_secs * u64::from(attempt));
                debug!(%chain_id, step, attempt, "retrying step after delay");
                tokio::time::sleep(delay).await;
            }

            let mut generation = GenerationRequest::new(instruction);
            if let Some(ref artifact) = request.reference_artifact {
                generation = generation.with_reference(artifact.clone());
            }
            let create = CreateJobRequest {
                kind: JobKind::PipelineStep,
                owner_id: request.owner_id.clone(),
                owner_class: request.owner_class.clone(),
                request: generation,
                shared: request.shared,
            };

            let job = match self.store.create(create) {
                Ok(job) => job,
                Err(e) => {
                    last_error = format!("failed to create step job: {e}");
                    continue;
                }
            };

            // The chain already holds the lease; the step runs without
            // one of its own.
            let done = match self.controller.run_with_retry(&job.id, None).await {
                Ok(done) => done,
                Err(e) => {
                    last_error = e.to_string();
                    warn!(%chain_id, step, attempt, error = %last_error, "step attempt failed");
                    continue;
                }
            };

            let artifact_ref = match done.result_ref.as_deref() {
                Some(artifact_ref) => artifact_ref,
                None => {
                    last_error = "step finished without an artifact".to_string();
                    continue;
                }
            };

            // A render can succeed while its artifact cannot be
            // retrieved. That failure is invisible to the per-job
            // retries, which is what this outer loop is for.
            match self.media.fetch_local(artifact_ref).await {
                Ok(local_path) => {
                    debug!(%chain_id, step, attempt, job_id = %done.id, "step produced artifact");
                    return Ok(StepOutput {
                        job_id: done.id,
                        local_path,
                    });
                }
                Err(e) => {
                    last_error = format!("artifact retrieval failed: {e}");
                    warn!(%chain_id, step, attempt, error = %last_error, "step attempt failed");
                }
            }
        }

        Err(format!(
            "step {step} failed after {} attempts: {last_error}",
            chain.step_attempts
        ))
    }

    /// Best-effort instruction rewrite from a sample of the previous
    /// shot.
    async fn continuity_instruction(
        &self,
        chain_id: &str,
        instruction: &str,
        previous_path: &std::path::Path,
    ) -> String {
        let sample = match self.media.extract_representative_sample(previous_path).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(%chain_id, error = %e, "sample extraction failed, using original instruction");
                return instruction.to_string();
            }
        };

        match self
            .analyst
            .refine_instruction(instruction, &sample.to_string_lossy())
            .await
        {
            Ok(refined) => refined,
            Err(e) => {
                warn!(%chain_id, error = %e, "continuity analysis failed, using original instruction");
                instruction.to_string()
            }
        }
    }

    /// Persist the merged artifact as its own terminal job, flagged
    /// composite so retention logic leaves it alone.
    async fn record_composite(
        &self,
        request: &ChainRequest,
        merged: &std::path::Path,
    ) -> Result<String, crate::job::JobStoreError> {
        let create = CreateJobRequest {
            kind: JobKind::Single,
            owner_id: request.owner_id.clone(),
            owner_class: request.owner_class.clone(),
            request: GenerationRequest::new(format!("merged story chain ({} shots)", request.steps.len())),
            shared: request.shared,
        };

        let mut job = self.store.create(create)?;
        job.status = JobStatus::Done;
        job.result_ref = Some(merged.to_string_lossy().to_string());
        job.composite = true;
        self.store.update(&job)?;

        Ok(job.id)
    }
}
