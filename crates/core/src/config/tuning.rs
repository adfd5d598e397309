//! Polled tuning source.
//!
//! The limiter and retry controller re-read tuning on every decision
//! rather than caching it at construction, so ceilings and retry
//! constants can change mid-run.

use std::sync::RwLock;

use super::types::Tuning;

/// Source of current tuning values.
pub trait TuningSource: Send + Sync {
    /// Snapshot of the current tuning.
    fn current(&self) -> Tuning;
}

/// Shared, updatable tuning holder.
///
/// Cheap to clone a snapshot from; `update` swaps in new values that
/// the next acquire/retry decision will observe.
pub struct SharedTuning {
    inner: RwLock<Tuning>,
}

impl SharedTuning {
    pub fn new(tuning: Tuning) -> Self {
        Self {
            inner: RwLock::new(tuning),
        }
    }

    /// Replace the tuning wholesale.
    pub fn update(&self, tuning: Tuning) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = tuning;
    }
}

impl Default for SharedTuning {
    fn default() -> Self {
        Self::new(Tuning::default())
    }
}

impl TuningSource for SharedTuning {
    fn current(&self) -> Tuning {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_is_visible() {
        let shared = SharedTuning::default();
        assert_eq!(shared.current().retry.max_attempts, 3);

        let mut tuning = shared.current();
        tuning.retry.max_attempts = 7;
        shared.update(tuning);

        assert_eq!(shared.current().retry.max_attempts, 7);
    }
}
