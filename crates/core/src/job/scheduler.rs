//! Fair ordering of pending jobs.
//!
//! A strict priority queue starves low-priority callers under
//! sustained high-priority load. Instead each pending job gets a score
//! of `base_weight(owner_class) - wait_seconds`, served ascending: a
//! waiting job's score sinks linearly, so it eventually undercuts any
//! freshly submitted job regardless of class. Bounded starvation, not
//! strict FIFO.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{SchedulerTuning, TuningSource};

use super::types::Job;

/// Scheduling score for one job at one instant. Lower is served first.
pub fn fair_score(job: &Job, weights: &SchedulerTuning, now: DateTime<Utc>) -> i64 {
    let wait_secs = (now - job.created_at).num_seconds().max(0);
    weights.weight_for(&job.owner_class) - wait_secs
}

/// Orders pending jobs by decaying priority score.
pub struct FairScheduler {
    tuning: Arc<dyn TuningSource>,
}

impl FairScheduler {
    pub fn new(tuning: Arc<dyn TuningSource>) -> Self {
        Self { tuning }
    }

    /// Sort jobs by ascending score at the current wall clock, with a
    /// stable tie-break on creation order. Scores are computed per
    /// read, never cached.
    pub fn order(&self, mut jobs: Vec<Job>) -> Vec<Job> {
        let weights = self.tuning.current().scheduler;
        let now = Utc::now();
        jobs.sort_by(|a, b| {
            fair_score(a, &weights, now)
                .cmp(&fair_score(b, &weights, now))
                .then(a.created_at.cmp(&b.created_at))
        });
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedTuning;
    use crate::job::{GenerationRequest, JobKind, JobStatus};
    use chrono::Duration;

    fn job_with(owner_class: &str, age_secs: i64) -> Job {
        let created_at = Utc::now() - Duration::seconds(age_secs);
        Job {
            id: uuid::Uuid::new_v4().to_string(),
            kind: JobKind::Single,
            owner_id: "owner".to_string(),
            owner_class: owner_class.to_string(),
            status: JobStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            created_at,
            updated_at: created_at,
            request: GenerationRequest::new("x"),
            result_ref: None,
            error_detail: None,
            shared: false,
            composite: false,
            lease_token: None,
            review: None,
        }
    }

    fn tuning_with_classes() -> Arc<SharedTuning> {
        let shared = SharedTuning::default();
        let mut tuning = shared.current();
        tuning.scheduler.class_weights.insert("premium".to_string(), 0);
        tuning.scheduler.class_weights.insert("standard".to_string(), 600);
        shared.update(tuning);
        Arc::new(shared)
    }

    #[test]
    fn test_fresh_premium_beats_fresh_standard() {
        let tuning = tuning_with_classes();
        let scheduler = FairScheduler::new(tuning);

        let ordered = scheduler.order(vec![job_with("standard", 0), job_with("premium", 0)]);
        assert_eq!(ordered[0].owner_class, "premium");
    }

    #[test]
    fn test_waiting_standard_overtakes_fresh_premium() {
        // Standard weight 600, waited 601s: score -1.
        // Premium weight 0, fresh: score 0. Standard goes first.
        let tuning = tuning_with_classes();
        let scheduler = FairScheduler::new(tuning);

        let ordered = scheduler.order(vec![job_with("premium", 0), job_with("standard", 601)]);
        assert_eq!(ordered[0].owner_class, "standard");
    }

    #[test]
    fn test_equal_scores_tie_break_on_creation_order() {
        let tuning = Arc::new(SharedTuning::default());
        let scheduler = FairScheduler::new(tuning);

        let older = job_with("standard", 20);
        let newer = job_with("standard", 10);
        let older_id = older.id.clone();

        let ordered = scheduler.order(vec![newer, older]);
        assert_eq!(ordered[0].id, older_id);
    }

    #[test]
    fn test_unknown_class_uses_default_weight() {
        let weights = SchedulerTuning::default();
        let job = job_with("mystery", 0);
        let score = fair_score(&job, &weights, Utc::now());
        assert_eq!(score, weights.default_weight);
    }

    #[test]
    fn test_score_decays_linearly_with_wait() {
        let weights = SchedulerTuning::default();
        let now = Utc::now();
        let job = job_with("standard", 100);
        let score = fair_score(&job, &weights, now);
        assert!((score - (weights.default_weight - 100)).abs() <= 1);
    }
}
