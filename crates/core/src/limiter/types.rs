//! Lease data types.

use chrono::{DateTime, Duration, Utc};

/// A time-bounded reservation of one concurrency slot.
///
/// Leases are ephemeral: a holder that crashes before releasing loses
/// the slot when `expires_at` passes, with no manual intervention.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    /// Unique token, recorded on the admitted job row so the sweeper
    /// can revoke it explicitly.
    pub token: String,

    /// Slot category (e.g. "video_generation").
    pub category: String,

    /// Owner the slot additionally counts against, if any.
    pub owner: Option<String>,

    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(category: &str, owner: Option<&str>, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            token: uuid::Uuid::new_v4().to_string(),
            category: category.to_string(),
            owner: owner.map(String::from),
            acquired_at: now,
            expires_at: now + Duration::seconds(ttl_secs as i64),
        }
    }
}

/// Error type for limiter operations.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// Database error.
    #[error("Lease store error: {0}")]
    Store(String),
}
