//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::store::{JobFilter, JobStore, JobStoreError};
use super::types::{CreateJobRequest, GenerationRequest, Job, JobKind, JobStatus};

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and initialize tables.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path).map_err(|e| JobStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| JobStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                owner_class TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                request TEXT NOT NULL,
                result_ref TEXT,
                error_detail TEXT,
                shared INTEGER NOT NULL DEFAULT 0,
                composite INTEGER NOT NULL DEFAULT 0,
                lease_token TEXT,
                review TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .map_err(|e| JobStoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }

        if let Some(ref owner_id) = filter.owner_id {
            conditions.push("owner_id = ?");
            params.push(Box::new(owner_id.clone()));
        }

        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn parse_status(s: &str) -> JobStatus {
        match s {
            "processing" => JobStatus::Processing,
            "done" => JobStatus::Done,
            "error" => JobStatus::Error,
            "archived" => JobStatus::Archived,
            _ => JobStatus::Pending,
        }
    }

    fn parse_kind(s: &str) -> JobKind {
        match s {
            "pipeline_step" => JobKind::PipelineStep,
            _ => JobKind::Single,
        }
    }

    fn parse_timestamp(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let owner_id: String = row.get(2)?;
        let owner_class: String = row.get(3)?;
        let status: String = row.get(4)?;
        let retry_count: u32 = row.get(5)?;
        let last_attempt_at: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        let request_json: String = row.get(9)?;
        let result_ref: Option<String> = row.get(10)?;
        let error_detail: Option<String> = row.get(11)?;
        let shared: bool = row.get(12)?;
        let composite: bool = row.get(13)?;
        let lease_token: Option<String> = row.get(14)?;
        let review: Option<String> = row.get(15)?;

        let request: GenerationRequest = serde_json::from_str(&request_json)
            .unwrap_or_else(|_| GenerationRequest::new(""));

        Ok(Job {
            id,
            kind: Self::parse_kind(&kind),
            owner_id,
            owner_class,
            status: Self::parse_status(&status),
            retry_count,
            last_attempt_at: last_attempt_at.as_deref().map(Self::parse_timestamp),
            created_at: Self::parse_timestamp(&created_at),
            updated_at: Self::parse_timestamp(&updated_at),
            request,
            result_ref,
            error_detail,
            shared,
            composite,
            lease_token,
            review,
        })
    }
}

const JOB_COLUMNS: &str = "id, kind, owner_id, owner_class, status, retry_count, last_attempt_at, created_at, updated_at, request, result_ref, error_detail, shared, composite, lease_token, review";

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let request_json = serde_json::to_string(&request.request)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (id, kind, owner_id, owner_class, status, retry_count, created_at, updated_at, request, shared, composite) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?, 0)",
            params![
                id,
                request.kind.as_str(),
                request.owner_id,
                request.owner_class,
                JobStatus::Pending.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
                request_json,
                request.shared,
            ],
        )
        .map_err(|e| JobStoreError::Database(e.to_string()))?;

        Ok(Job {
            id,
            kind: request.kind,
            owner_id: request.owner_id,
            owner_class: request.owner_class,
            status: JobStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
            request: request.request,
            result_ref: None,
            error_detail: None,
            shared: request.shared,
            composite: false,
            lease_token: None,
            review: None,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let result = conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(JobStoreError::Database(e.to_string())),
        }
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at ASC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result.map_err(|e| JobStoreError::Database(e.to_string()))?);
        }

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| JobStoreError::Database(e.to_string()))
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let updated = conn
            .execute(
                "UPDATE jobs SET status = ?, retry_count = ?, last_attempt_at = ?, updated_at = ?, result_ref = ?, error_detail = ?, composite = ?, lease_token = ?, review = ? WHERE id = ?",
                params![
                    job.status.as_str(),
                    job.retry_count,
                    job.last_attempt_at.map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                    job.result_ref,
                    job.error_detail,
                    job.composite,
                    job.lease_token,
                    job.review,
                    job.id,
                ],
            )
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(JobStoreError::NotFound(job.id.clone()));
        }

        Ok(())
    }

    fn set_review(&self, id: &str, review: &str) -> Result<(), JobStoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let updated = conn
            .execute(
                "UPDATE jobs SET review = ?, updated_at = ? WHERE id = ?",
                params![review, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(JobStoreError::NotFound(id.to_string()));
        }

        Ok(())
    }

    fn list_stale_processing(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let mut jobs = Vec::new();

        match older_than {
            Some(cutoff) => {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE status = 'processing' AND last_attempt_at IS NOT NULL AND last_attempt_at < ? ORDER BY created_at ASC",
                    JOB_COLUMNS
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| JobStoreError::Database(e.to_string()))?;
                let rows = stmt
                    .query_map(params![cutoff.to_rfc3339()], Self::row_to_job)
                    .map_err(|e| JobStoreError::Database(e.to_string()))?;
                for row_result in rows {
                    jobs.push(row_result.map_err(|e| JobStoreError::Database(e.to_string()))?);
                }
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE status = 'processing' ORDER BY created_at ASC",
                    JOB_COLUMNS
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| JobStoreError::Database(e.to_string()))?;
                let rows = stmt
                    .query_map([], Self::row_to_job)
                    .map_err(|e| JobStoreError::Database(e.to_string()))?;
                for row_result in rows {
                    jobs.push(row_result.map_err(|e| JobStoreError::Database(e.to_string()))?);
                }
            }
        }

        Ok(jobs)
    }

    fn delete(&self, id: &str) -> Result<Job, JobStoreError> {
        let job = self
            .get(id)?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM jobs WHERE id = ?", params![id])
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        Ok(job)
    }
}
