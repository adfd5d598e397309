//! Lease storage trait and SQLite implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::types::{Lease, LimiterError};

/// Trait for lease storage backends.
///
/// One row per held slot. Counts only see rows that have not expired,
/// so a crashed holder's slot comes back on its own once the TTL
/// passes, whether or not `purge_expired` has run yet.
pub trait LeaseStore: Send + Sync {
    /// Insert a lease row.
    fn insert(&self, lease: &Lease) -> Result<(), LimiterError>;

    /// Live (unexpired) leases in a category.
    fn count_category(&self, category: &str) -> Result<u32, LimiterError>;

    /// Live (unexpired) leases held by one owner in a category.
    fn count_owner(&self, category: &str, owner: &str) -> Result<u32, LimiterError>;

    /// Delete a lease by token. Returns false if no row matched, which
    /// is the normal outcome for a duplicate or post-expiry release.
    fn remove(&self, token: &str) -> Result<bool, LimiterError>;

    /// Delete rows whose expiry is in the past. Returns how many went.
    fn purge_expired(&self) -> Result<u32, LimiterError>;
}

/// SQLite-backed lease store.
pub struct SqliteLeaseStore {
    conn: Mutex<Connection>,
}

impl SqliteLeaseStore {
    /// Open (or create) the database file and initialize tables.
    pub fn new(path: &Path) -> Result<Self, LimiterError> {
        let conn = Connection::open(path).map_err(|e| LimiterError::Store(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory lease store (useful for testing).
    pub fn in_memory() -> Result<Self, LimiterError> {
        let conn = Connection::open_in_memory().map_err(|e| LimiterError::Store(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LimiterError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leases (
                token TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                owner TEXT,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_leases_category ON leases(category);
            CREATE INDEX IF NOT EXISTS idx_leases_expires_at ON leases(expires_at);
            "#,
        )
        .map_err(|e| LimiterError::Store(e.to_string()))?;

        Ok(())
    }

    fn parse_timestamp(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    #[cfg(test)]
    fn get(&self, token: &str) -> Result<Option<Lease>, LimiterError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let result = conn.query_row(
            "SELECT token, category, owner, acquired_at, expires_at FROM leases WHERE token = ?",
            params![token],
            |row| {
                let acquired_at: String = row.get(3)?;
                let expires_at: String = row.get(4)?;
                Ok(Lease {
                    token: row.get(0)?,
                    category: row.get(1)?,
                    owner: row.get(2)?,
                    acquired_at: Self::parse_timestamp(&acquired_at),
                    expires_at: Self::parse_timestamp(&expires_at),
                })
            },
        );

        match result {
            Ok(lease) => Ok(Some(lease)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(LimiterError::Store(e.to_string())),
        }
    }
}

impl LeaseStore for SqliteLeaseStore {
    fn insert(&self, lease: &Lease) -> Result<(), LimiterError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        conn.execute(
            "INSERT INTO leases (token, category, owner, acquired_at, expires_at) VALUES (?, ?, ?, ?, ?)",
            params![
                lease.token,
                lease.category,
                lease.owner,
                lease.acquired_at.to_rfc3339(),
                lease.expires_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LimiterError::Store(e.to_string()))?;

        Ok(())
    }

    fn count_category(&self, category: &str) -> Result<u32, LimiterError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        conn.query_row(
            "SELECT COUNT(*) FROM leases WHERE category = ? AND expires_at > ?",
            params![category, Utc::now().to_rfc3339()],
            |row| row.get(0),
        )
        .map_err(|e| LimiterError::Store(e.to_string()))
    }

    fn count_owner(&self, category: &str, owner: &str) -> Result<u32, LimiterError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        conn.query_row(
            "SELECT COUNT(*) FROM leases WHERE category = ? AND owner = ? AND expires_at > ?",
            params![category, owner, Utc::now().to_rfc3339()],
            |row| row.get(0),
        )
        .map_err(|e| LimiterError::Store(e.to_string()))
    }

    fn remove(&self, token: &str) -> Result<bool, LimiterError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let deleted = conn
            .execute("DELETE FROM leases WHERE token = ?", params![token])
            .map_err(|e| LimiterError::Store(e.to_string()))?;

        Ok(deleted > 0)
    }

    fn purge_expired(&self) -> Result<u32, LimiterError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let purged = conn
            .execute(
                "DELETE FROM leases WHERE expires_at <= ?",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(|e| LimiterError::Store(e.to_string()))?;

        Ok(purged as u32)
    }
}
