//! The job ledger: durable, transition-guarded job records and their errors.
//!
//! Every mutation runs inside one SQLite transaction on the shared
//! connection, so readers never observe a half-applied update (a status
//! without its counters, or an error row without the counter bump).

use chrono::Utc;
use rusqlite::Connection;

use super::model::{
    format_timestamp, ItemCounters, ItemOutcome, Job, JobError, JobStatus, NewJob,
};
use super::ErrorCode;
use crate::db::job_repo::{self, InsertOutcome, JobRow};
use crate::db::{job_error_repo, tenant_repo, Database};
use crate::error::{ItemError, LedgerError};
use crate::hasher::Fingerprint;

/// Result of [`JobLedger::create`].
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new `PENDING` job was recorded.
    Created(Job),
    /// The tenant already had a job for this fingerprint.
    Existing(Job),
}

impl CreateOutcome {
    pub fn job(&self) -> &Job {
        match self {
            CreateOutcome::Created(job) | CreateOutcome::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            CreateOutcome::Created(job) | CreateOutcome::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Typed listing filter.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub tenant_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// A page of jobs plus the total number matching the filter.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
}

#[derive(Clone)]
pub struct JobLedger {
    db: Database,
}

impl JobLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn tenant_exists(&self, tenant_id: &str) -> Result<bool, LedgerError> {
        self.db
            .with_conn(|conn| Ok(tenant_repo::exists(conn, tenant_id)?))
    }

    /// Looks up the job a tenant already has for a fingerprint.
    pub fn find_existing(
        &self,
        tenant_id: &str,
        digest: &Fingerprint,
    ) -> Result<Option<Job>, LedgerError> {
        self.db.with_conn(|conn| {
            job_repo::find_by_tenant_digest(conn, tenant_id, digest.as_str())?
                .map(Job::try_from)
                .transpose()
        })
    }

    /// Records a new `PENDING` job, or returns the job that already holds
    /// `(tenant_id, digest)`. Two racing creators get the same job back.
    pub fn create(&self, new_job: NewJob) -> Result<CreateOutcome, LedgerError> {
        let now = format_timestamp(Utc::now());
        let row = JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: new_job.tenant_id,
            digest: new_job.digest.as_str().to_string(),
            filename: new_job.filename,
            media_type: new_job.media_type,
            size_bytes: new_job.size_bytes as i64,
            status: JobStatus::Pending.as_str().to_string(),
            items_total: 0,
            items_succeeded: 0,
            items_failed: 0,
            error: None,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        };

        self.db.with_tx(|tx| match job_repo::insert(tx, &row)? {
            InsertOutcome::Inserted => {
                log::debug!("Created job {} for tenant {}", row.id, row.tenant_id);
                Ok(CreateOutcome::Created(Job::try_from(row.clone())?))
            }
            InsertOutcome::Duplicate => {
                let existing = job_repo::find_by_tenant_digest(tx, &row.tenant_id, &row.digest)?
                    .ok_or_else(|| LedgerError::NotFound(row.digest.clone()))?;
                log::debug!(
                    "Tenant {} already has job {} for digest {}",
                    row.tenant_id,
                    existing.id,
                    row.digest
                );
                Ok(CreateOutcome::Existing(Job::try_from(existing)?))
            }
        })
    }

    pub fn find(&self, job_id: &str) -> Result<Option<Job>, LedgerError> {
        self.db.with_conn(|conn| {
            job_repo::find_by_id(conn, job_id)?
                .map(Job::try_from)
                .transpose()
        })
    }

    pub fn get(&self, job_id: &str) -> Result<Job, LedgerError> {
        self.find(job_id)?
            .ok_or_else(|| LedgerError::NotFound(job_id.to_string()))
    }

    /// Moves a job along the state machine. When `counters` is given they
    /// replace the stored tallies in the same transaction.
    pub fn transition(
        &self,
        job_id: &str,
        to: JobStatus,
        counters: Option<ItemCounters>,
    ) -> Result<Job, LedgerError> {
        self.db.with_tx(|tx| {
            let now = format_timestamp(Utc::now());
            apply_transition(tx, job_id, to, &now, None)?;
            if let Some(c) = counters {
                job_repo::set_counters_if(
                    tx,
                    job_id,
                    to.as_str(),
                    c.total as i64,
                    c.succeeded as i64,
                    c.failed as i64,
                    &now,
                )?;
            }
            load(tx, job_id)
        })
    }

    /// Ends a `PROCESSING` job in `ERROR`, recording a job-level error
    /// named after the uploaded file. Counters keep whatever was recorded.
    pub fn fail(&self, job_id: &str, code: ErrorCode, message: &str) -> Result<Job, LedgerError> {
        self.db.with_tx(|tx| {
            let now = format_timestamp(Utc::now());
            let summary = format!("{}: {}", code, message);
            let row = apply_transition(tx, job_id, JobStatus::Error, &now, Some(&summary))?;
            job_error_repo::append(
                tx,
                job_id,
                &row.filename,
                code.as_str(),
                message,
                &serde_json::Value::Null,
                &now,
            )?;
            load(tx, job_id)
        })
    }

    /// Records the outcome of one attempted item.
    pub fn record_item(
        &self,
        job_id: &str,
        item_name: &str,
        outcome: &ItemOutcome,
    ) -> Result<ItemCounters, LedgerError> {
        match outcome {
            ItemOutcome::Succeeded => self.record_success(job_id),
            ItemOutcome::Failed(error) => self.record_failure(job_id, item_name, error),
        }
    }

    /// Counts one item as succeeded.
    pub fn record_success(&self, job_id: &str) -> Result<ItemCounters, LedgerError> {
        self.db.with_tx(|tx| {
            let now = format_timestamp(Utc::now());
            bump_counters(tx, job_id, 1, 0, &now)?;
            Ok(load(tx, job_id)?.counters)
        })
    }

    /// Counts one item as failed and appends its error, atomically.
    pub fn record_failure(
        &self,
        job_id: &str,
        item_name: &str,
        error: &ItemError,
    ) -> Result<ItemCounters, LedgerError> {
        self.db.with_tx(|tx| {
            let now = format_timestamp(Utc::now());
            bump_counters(tx, job_id, 0, 1, &now)?;
            job_error_repo::append(
                tx,
                job_id,
                item_name,
                error.code.as_str(),
                &error.message,
                &error.context,
                &now,
            )?;
            Ok(load(tx, job_id)?.counters)
        })
    }

    /// All errors of a job in the order they were recorded.
    pub fn errors(&self, job_id: &str) -> Result<Vec<JobError>, LedgerError> {
        self.db.with_conn(|conn| {
            job_error_repo::list_for_job(conn, job_id)?
                .into_iter()
                .map(JobError::try_from)
                .collect()
        })
    }

    pub fn error_count(&self, job_id: &str) -> Result<u64, LedgerError> {
        self.db
            .with_conn(|conn| Ok(job_error_repo::count_for_job(conn, job_id)?))
    }

    /// Lists jobs newest first.
    pub fn list(&self, query: &JobQuery) -> Result<JobPage, LedgerError> {
        let filter = job_repo::JobFilter {
            tenant_id: query.tenant_id.clone(),
            status: query.status.map(|s| s.as_str().to_string()),
            limit: query.limit,
            offset: query.offset,
        };
        self.db.with_conn(|conn| {
            let (rows, total) = job_repo::query(conn, &filter)?;
            let jobs = rows
                .into_iter()
                .map(Job::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(JobPage { jobs, total })
        })
    }

    /// IDs of all jobs currently in `status`, oldest first.
    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<String>, LedgerError> {
        self.db
            .with_conn(|conn| Ok(job_repo::ids_by_status(conn, status.as_str())?))
    }
}

fn load(conn: &Connection, job_id: &str) -> Result<Job, LedgerError> {
    job_repo::find_by_id(conn, job_id)?
        .ok_or_else(|| LedgerError::NotFound(job_id.to_string()))
        .and_then(Job::try_from)
}

fn current_status(row: &JobRow) -> Result<JobStatus, LedgerError> {
    JobStatus::parse(&row.status).ok_or_else(|| LedgerError::CorruptRow {
        job_id: row.id.clone(),
        reason: format!("unknown status '{}'", row.status),
    })
}

/// Checks and applies one transition, returning the row as it was before.
fn apply_transition(
    conn: &Connection,
    job_id: &str,
    to: JobStatus,
    now: &str,
    error: Option<&str>,
) -> Result<JobRow, LedgerError> {
    let row = job_repo::find_by_id(conn, job_id)?
        .ok_or_else(|| LedgerError::NotFound(job_id.to_string()))?;
    let from = current_status(&row)?;

    let illegal = || LedgerError::IllegalTransition {
        job_id: job_id.to_string(),
        from,
        to,
    };
    if !from.can_transition_to(to) {
        return Err(illegal());
    }

    let completed_at = to.is_terminal().then_some(now);
    if !job_repo::update_status_if(
        conn,
        job_id,
        from.as_str(),
        to.as_str(),
        now,
        completed_at,
        error,
    )? {
        return Err(illegal());
    }

    log::debug!("Job {} {} -> {}", job_id, from, to);
    Ok(row)
}

fn bump_counters(
    conn: &Connection,
    job_id: &str,
    succeeded: i64,
    failed: i64,
    now: &str,
) -> Result<(), LedgerError> {
    let processing = JobStatus::Processing.as_str();
    if job_repo::increment_counters_if(conn, job_id, processing, succeeded, failed, now)? {
        return Ok(());
    }

    match job_repo::find_by_id(conn, job_id)? {
        None => Err(LedgerError::NotFound(job_id.to_string())),
        Some(row) => Err(LedgerError::NotProcessing {
            job_id: job_id.to_string(),
            status: current_status(&row)?,
        }),
    }
}
