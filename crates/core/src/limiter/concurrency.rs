//! Ceiling enforcement over the lease store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::TuningSource;
use crate::metrics;

use super::store::LeaseStore;
use super::types::{Lease, LimiterError};

/// Grants and revokes concurrency leases against per-category and
/// per-owner ceilings.
///
/// Admission is increment-then-check: the row goes in first, then the
/// counts are read, and the row is rolled back if either ceiling is
/// busted. Two concurrent acquisitions racing for the last slot both
/// see the overshoot and at most one keeps its row, so the ceiling
/// holds without a table lock.
pub struct ConcurrencyLimiter {
    store: Arc<dyn LeaseStore>,
    tuning: Arc<dyn TuningSource>,
}

impl ConcurrencyLimiter {
    pub fn new(store: Arc<dyn LeaseStore>, tuning: Arc<dyn TuningSource>) -> Self {
        Self { store, tuning }
    }

    /// Try to take one slot. Returns `None` when the category ceiling
    /// or the (category, owner) ceiling is already met.
    pub fn acquire(
        &self,
        category: &str,
        owner: Option<&str>,
    ) -> Result<Option<Lease>, LimiterError> {
        let limits = self.tuning.current().limiter;

        let purged = self.store.purge_expired()?;
        if purged > 0 {
            metrics::LEASES_EXPIRED.inc_by(purged as u64);
            warn!(purged, "reclaimed expired leases");
        }

        let lease = Lease::new(category, owner, limits.lease_ttl_secs);
        self.store.insert(&lease)?;

        let category_count = self.store.count_category(category)?;
        if category_count > limits.ceiling_for(category) {
            self.store.remove(&lease.token)?;
            metrics::LEASES_REJECTED.with_label_values(&[category]).inc();
            debug!(category, category_count, "category ceiling met, lease refused");
            return Ok(None);
        }

        if let Some(owner) = owner {
            let owner_count = self.store.count_owner(category, owner)?;
            if owner_count > limits.per_owner_ceiling {
                self.store.remove(&lease.token)?;
                metrics::LEASES_REJECTED.with_label_values(&[category]).inc();
                debug!(category, owner, owner_count, "owner ceiling met, lease refused");
                return Ok(None);
            }
        }

        metrics::LEASES_ACQUIRED.with_label_values(&[category]).inc();
        debug!(category, token = %lease.token, "lease acquired");
        Ok(Some(lease))
    }

    /// Give a slot back. Releasing a lease that already expired (or was
    /// already released) is a no-op, never an error: the row is simply
    /// gone and the count cannot go below the live holders.
    pub fn release(&self, lease: &Lease) -> Result<(), LimiterError> {
        self.release_token(&lease.token)
    }

    /// Release by raw token, for callers that only kept the token
    /// (e.g. the sweeper reading it off a job row).
    pub fn release_token(&self, token: &str) -> Result<(), LimiterError> {
        let removed = self.store.remove(token)?;
        if !removed {
            debug!(token, "release found no lease row (expired or already released)");
        }
        Ok(())
    }

    /// Poll [`Self::acquire`] until a slot opens or the timeout passes.
    pub async fn acquire_with_wait(
        &self,
        category: &str,
        owner: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<Lease>, LimiterError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(lease) = self.acquire(category, owner)? {
                return Ok(Some(lease));
            }

            let poll = Duration::from_secs(self.tuning.current().limiter.acquire_poll_secs);
            if tokio::time::Instant::now() + poll > deadline {
                debug!(category, "gave up waiting for a lease");
                return Ok(None);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedTuning;
    use crate::limiter::SqliteLeaseStore;
    use chrono::Utc;

    fn limiter_with_ceilings(category_ceiling: u32, owner_ceiling: u32) -> ConcurrencyLimiter {
        let shared = SharedTuning::default();
        let mut tuning = shared.current();
        tuning.limiter.default_ceiling = category_ceiling;
        tuning.limiter.per_owner_ceiling = owner_ceiling;
        shared.update(tuning);

        ConcurrencyLimiter::new(
            Arc::new(SqliteLeaseStore::in_memory().unwrap()),
            Arc::new(shared),
        )
    }

    #[test]
    fn test_category_ceiling_enforced_and_released() {
        let limiter = limiter_with_ceilings(2, 10);

        let a = limiter.acquire("video_generation", None).unwrap().unwrap();
        let _b = limiter.acquire("video_generation", None).unwrap().unwrap();
        assert!(limiter.acquire("video_generation", None).unwrap().is_none());

        // Other categories are unaffected.
        assert!(limiter.acquire("story_chain", None).unwrap().is_some());

        limiter.release(&a).unwrap();
        assert!(limiter.acquire("video_generation", None).unwrap().is_some());
    }

    #[test]
    fn test_owner_ceiling_enforced_independently() {
        let limiter = limiter_with_ceilings(10, 1);

        let _a = limiter
            .acquire("video_generation", Some("alice"))
            .unwrap()
            .unwrap();
        assert!(limiter
            .acquire("video_generation", Some("alice"))
            .unwrap()
            .is_none());
        assert!(limiter
            .acquire("video_generation", Some("bob"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_double_release_never_goes_negative() {
        let limiter = limiter_with_ceilings(1, 10);

        let a = limiter.acquire("video_generation", None).unwrap().unwrap();
        limiter.release(&a).unwrap();
        limiter.release(&a).unwrap();
        limiter.release_token("never-existed").unwrap();

        // Exactly one slot is free, not three.
        let _b = limiter.acquire("video_generation", None).unwrap().unwrap();
        assert!(limiter.acquire("video_generation", None).unwrap().is_none());
    }

    #[test]
    fn test_expired_lease_slot_comes_back() {
        let limiter = limiter_with_ceilings(1, 10);

        let mut stale = limiter.acquire("video_generation", None).unwrap().unwrap();
        assert!(limiter.acquire("video_generation", None).unwrap().is_none());

        // Backdate the expiry directly in the store, as if the holder
        // died and the TTL ran out.
        limiter.store.remove(&stale.token).unwrap();
        stale.expires_at = Utc::now() - chrono::Duration::seconds(1);
        limiter.store.insert(&stale).unwrap();

        let fresh = limiter.acquire("video_generation", None).unwrap();
        assert!(fresh.is_some());

        // A late release from the dead holder changes nothing.
        limiter.release(&stale).unwrap();
        assert!(limiter.acquire("video_generation", None).unwrap().is_none());
    }

    #[test]
    fn test_ceiling_change_takes_effect_on_next_acquire() {
        let shared = SharedTuning::default();
        let mut tuning = shared.current();
        tuning.limiter.default_ceiling = 1;
        shared.update(tuning.clone());
        let shared = Arc::new(shared);

        let limiter = ConcurrencyLimiter::new(
            Arc::new(SqliteLeaseStore::in_memory().unwrap()),
            shared.clone(),
        );

        let _a = limiter.acquire("video_generation", None).unwrap().unwrap();
        assert!(limiter.acquire("video_generation", None).unwrap().is_none());

        tuning.limiter.default_ceiling = 2;
        shared.update(tuning);
        assert!(limiter.acquire("video_generation", None).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_wait_times_out() {
        let limiter = limiter_with_ceilings(1, 10);
        let _held = limiter.acquire("video_generation", None).unwrap().unwrap();

        let result = limiter
            .acquire_with_wait("video_generation", None, Duration::from_secs(12))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_acquire_with_wait_immediate_when_free() {
        let limiter = limiter_with_ceilings(1, 10);

        let lease = limiter
            .acquire_with_wait("video_generation", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(lease.is_some());
    }
}
