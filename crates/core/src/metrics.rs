//! Prometheus metrics for the orchestration engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_jobs_submitted_total", "Jobs accepted into the queue")
        .unwrap()
});

pub static JOBS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_jobs_completed_total", "Jobs finished successfully").unwrap()
});

pub static JOBS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_jobs_failed_total", "Jobs terminally errored").unwrap()
});

pub static JOB_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_job_attempts_total", "Provider execution attempts").unwrap()
});

pub static JOB_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "reelforge_job_duration_seconds",
        "Wall time of one provider execution attempt",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap()
});

pub static LEASES_ACQUIRED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reelforge_leases_acquired_total",
        "Leases granted, by category",
        &["category"]
    )
    .unwrap()
});

pub static LEASES_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reelforge_leases_rejected_total",
        "Acquisitions refused at a ceiling, by category",
        &["category"]
    )
    .unwrap()
});

pub static LEASES_EXPIRED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "reelforge_leases_expired_total",
        "Leases reclaimed by TTL expiry instead of release"
    )
    .unwrap()
});

pub static ZOMBIES_RECOVERED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "reelforge_zombies_recovered_total",
        "Stale processing jobs reset by the sweeper"
    )
    .unwrap()
});

pub static CHAINS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_chains_started_total", "Story chains admitted").unwrap()
});

pub static CHAINS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_chains_completed_total", "Story chains merged and done")
        .unwrap()
});

pub static CHAINS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_chains_failed_total", "Story chains that gave up").unwrap()
});

pub static REVIEWS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("reelforge_reviews_completed_total", "Review tasks processed").unwrap()
});

pub static REVIEW_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("reelforge_review_queue_depth", "Review tasks waiting in the channel")
        .unwrap()
});

/// Gather all registered metrics in text exposition format.
pub fn all_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        JOBS_SUBMITTED.inc();
        LEASES_ACQUIRED.with_label_values(&["video_generation"]).inc();
        REVIEW_QUEUE_DEPTH.set(3);

        let rendered = all_metrics();
        assert!(rendered.contains("reelforge_jobs_submitted_total"));
        assert!(rendered.contains("reelforge_leases_acquired_total"));
    }
}
