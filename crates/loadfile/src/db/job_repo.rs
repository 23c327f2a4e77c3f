//! Raw row operations for the `jobs` table.
//!
//! Status values are plain strings here; the typed state machine lives in
//! [`crate::jobs::ledger`].

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub tenant_id: String,
    pub digest: String,
    pub filename: String,
    pub media_type: Option<String>,
    pub size_bytes: i64,
    pub status: String,
    pub items_total: i64,
    pub items_succeeded: i64,
    pub items_failed: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            digest: row.get("digest")?,
            filename: row.get("filename")?,
            media_type: row.get("media_type")?,
            size_bytes: row.get("size_bytes")?,
            status: row.get("status")?,
            items_total: row.get("items_total")?,
            items_succeeded: row.get("items_succeeded")?,
            items_failed: row.get("items_failed")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Result of an insert guarded by the `(tenant_id, digest)` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another row already holds this `(tenant_id, digest)` pair.
    Duplicate,
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub tenant_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row unless the tenant already has a job for this digest.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<InsertOutcome, DatabaseError> {
    let inserted = conn.execute(
        "INSERT INTO jobs (id, tenant_id, digest, filename, media_type, size_bytes, status,
         items_total, items_succeeded, items_failed, error, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(tenant_id, digest) DO NOTHING",
        params![
            job.id,
            job.tenant_id,
            job.digest,
            job.filename,
            job.media_type,
            job.size_bytes,
            job.status,
            job.items_total,
            job.items_succeeded,
            job.items_failed,
            job.error,
            job.created_at,
            job.updated_at,
            job.completed_at,
        ],
    )?;

    Ok(if inserted == 1 {
        InsertOutcome::Inserted
    } else {
        InsertOutcome::Duplicate
    })
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds the job holding the given `(tenant_id, digest)` pair.
pub fn find_by_tenant_digest(
    conn: &Connection,
    tenant_id: &str,
    digest: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE tenant_id = ?1 AND digest = ?2",
            params![tenant_id, digest],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Moves a job from `from` to `to` only if it is currently in `from`.
///
/// Returns `false` when the row is missing or in another status; the caller
/// decides which. `completed_at` is written only when given.
pub fn update_status_if(
    conn: &Connection,
    id: &str,
    from: &str,
    to: &str,
    updated_at: &str,
    completed_at: Option<&str>,
    error: Option<&str>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = ?3, updated_at = ?4,
         completed_at = COALESCE(?5, completed_at), error = COALESCE(?6, error)
         WHERE id = ?1 AND status = ?2",
        params![id, from, to, updated_at, completed_at, error],
    )?;
    Ok(changed == 1)
}

/// Overwrites the item counters of a job in the given status.
pub fn set_counters_if(
    conn: &Connection,
    id: &str,
    status: &str,
    total: i64,
    succeeded: i64,
    failed: i64,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET items_total = ?3, items_succeeded = ?4, items_failed = ?5,
         updated_at = ?6
         WHERE id = ?1 AND status = ?2",
        params![id, status, total, succeeded, failed, updated_at],
    )?;
    Ok(changed == 1)
}

/// Adds to the item counters of a job in the given status.
pub fn increment_counters_if(
    conn: &Connection,
    id: &str,
    status: &str,
    succeeded: i64,
    failed: i64,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET items_total = items_total + ?3 + ?4,
         items_succeeded = items_succeeded + ?3, items_failed = items_failed + ?4,
         updated_at = ?5
         WHERE id = ?1 AND status = ?2",
        params![id, status, succeeded, failed, updated_at],
    )?;
    Ok(changed == 1)
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(conn: &Connection, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref tenant_id) = filter.tenant_id {
        conditions.push(format!("tenant_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(tenant_id.clone()));
    }
    if let Some(ref status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "SELECT * FROM jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows: Vec<JobRow> = stmt
        .query_map(params_ref.as_slice(), JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// Lists all job IDs in the given status, oldest first.
pub fn ids_by_status(conn: &Connection, status: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT id FROM jobs WHERE status = ?1 ORDER BY created_at ASC, id")?;
    let ids = stmt
        .query_map(params![status], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Counts jobs with the given status.
pub fn count_by_status(conn: &Connection, status: &str) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status = ?1",
        params![status],
        |r| r.get(0),
    )?;
    Ok(count)
}
