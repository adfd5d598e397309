//! Concurrency limiting with TTL leases.

mod concurrency;
mod store;
mod types;

pub use concurrency::ConcurrencyLimiter;
pub use store::{LeaseStore, SqliteLeaseStore};
pub use types::{Lease, LimiterError};
