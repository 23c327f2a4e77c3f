//! Append-only per-item error log for jobs.

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

/// A raw job error row. `id` is assigned by SQLite on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct JobErrorRow {
    pub id: i64,
    pub job_id: String,
    pub item_name: String,
    pub code: String,
    pub message: String,
    /// Serialized JSON context.
    pub context: String,
    pub created_at: String,
}

impl JobErrorRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            item_name: row.get("item_name")?,
            code: row.get("code")?,
            message: row.get("message")?,
            context: row.get("context")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Appends an error row and returns its assigned id. There is no update or
/// delete: rows only go away when their job is cascade-deleted.
pub fn append(
    conn: &Connection,
    job_id: &str,
    item_name: &str,
    code: &str,
    message: &str,
    context: &serde_json::Value,
    created_at: &str,
) -> Result<i64, DatabaseError> {
    let context = serde_json::to_string(context)?;
    conn.execute(
        "INSERT INTO job_errors (job_id, item_name, code, message, context, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![job_id, item_name, code, message, context, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Lists all errors of a job in insertion order.
pub fn list_for_job(conn: &Connection, job_id: &str) -> Result<Vec<JobErrorRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM job_errors WHERE job_id = ?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![job_id], JobErrorRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts the errors recorded for a job.
pub fn count_for_job(conn: &Connection, job_id: &str) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM job_errors WHERE job_id = ?1",
        params![job_id],
        |r| r.get(0),
    )?;
    Ok(count)
}
