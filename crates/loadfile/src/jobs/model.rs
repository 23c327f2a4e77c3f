//! Typed job, job error and status values.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_error_repo::JobErrorRow;
use crate::db::job_repo::JobRow;
use crate::error::{ItemError, LedgerError};
use crate::hasher::Fingerprint;

/// Lifecycle status of a job: `PENDING → PROCESSING → {DONE | ERROR}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "PROCESSING" => Some(JobStatus::Processing),
            "DONE" => Some(JobStatus::Done),
            "ERROR" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Position in the lifecycle. Observed statuses of one job never decrease.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Done | JobStatus::Error => 2,
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed taxonomy of recorded failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Per-item
    XmlEmpty,
    XmlMalformed,
    XmlUnexpectedRoot,
    UnsupportedItem,
    ItemTooLarge,
    ItemUnreadable,
    SinkRejected,
    // Whole-job
    ArchiveCorrupt,
    BlobUnreadable,
    UnsupportedMediaType,
    StorageFailure,
    Internal,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 12] = [
        ErrorCode::XmlEmpty,
        ErrorCode::XmlMalformed,
        ErrorCode::XmlUnexpectedRoot,
        ErrorCode::UnsupportedItem,
        ErrorCode::ItemTooLarge,
        ErrorCode::ItemUnreadable,
        ErrorCode::SinkRejected,
        ErrorCode::ArchiveCorrupt,
        ErrorCode::BlobUnreadable,
        ErrorCode::UnsupportedMediaType,
        ErrorCode::StorageFailure,
        ErrorCode::Internal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::XmlEmpty => "XML_EMPTY",
            ErrorCode::XmlMalformed => "XML_MALFORMED",
            ErrorCode::XmlUnexpectedRoot => "XML_UNEXPECTED_ROOT",
            ErrorCode::UnsupportedItem => "UNSUPPORTED_ITEM",
            ErrorCode::ItemTooLarge => "ITEM_TOO_LARGE",
            ErrorCode::ItemUnreadable => "ITEM_UNREADABLE",
            ErrorCode::SinkRejected => "SINK_REJECTED",
            ErrorCode::ArchiveCorrupt => "ARCHIVE_CORRUPT",
            ErrorCode::BlobUnreadable => "BLOB_UNREADABLE",
            ErrorCode::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            ErrorCode::StorageFailure => "STORAGE_FAILURE",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// True for failures that abort the whole job.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            ErrorCode::ArchiveCorrupt
                | ErrorCode::BlobUnreadable
                | ErrorCode::UnsupportedMediaType
                | ErrorCode::StorageFailure
                | ErrorCode::Internal
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job item tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCounters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// What happened to one attempted item.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Succeeded,
    Failed(ItemError),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded)
    }
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: String,
    pub digest: Fingerprint,
    pub filename: String,
    pub media_type: Option<String>,
    pub size_bytes: u64,
}

/// One tracked ingestion attempt for one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub digest: Fingerprint,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub size_bytes: u64,
    pub status: JobStatus,
    pub counters: ItemCounters,
    /// Job-level failure detail, set only when the job ends in `ERROR`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = LedgerError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| LedgerError::CorruptRow {
            job_id: row.id.clone(),
            reason,
        };

        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", row.status)))?;
        let digest = Fingerprint::parse(&row.digest)
            .ok_or_else(|| corrupt(format!("invalid digest '{}'", row.digest)))?;
        let created_at = parse_timestamp(&row.created_at).map_err(&corrupt)?;
        let updated_at = parse_timestamp(&row.updated_at).map_err(&corrupt)?;
        let completed_at = row
            .completed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(&corrupt)?;

        Ok(Job {
            id: row.id.clone(),
            tenant_id: row.tenant_id.clone(),
            digest,
            filename: row.filename.clone(),
            media_type: row.media_type.clone(),
            size_bytes: row.size_bytes.max(0) as u64,
            status,
            counters: ItemCounters {
                total: row.items_total.max(0) as u64,
                succeeded: row.items_succeeded.max(0) as u64,
                failed: row.items_failed.max(0) as u64,
            },
            error: row.error.clone(),
            created_at,
            updated_at,
            completed_at,
        })
    }
}

/// A recorded failure for one item (or, for structural codes, the job).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub id: i64,
    pub job_id: String,
    pub item_name: String,
    pub code: ErrorCode,
    pub message: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<JobErrorRow> for JobError {
    type Error = LedgerError;

    fn try_from(row: JobErrorRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| LedgerError::CorruptRow {
            job_id: row.job_id.clone(),
            reason,
        };

        let code = ErrorCode::parse(&row.code)
            .ok_or_else(|| corrupt(format!("unknown error code '{}'", row.code)))?;
        let context = serde_json::from_str(&row.context)
            .map_err(|e| corrupt(format!("invalid error context: {}", e)))?;
        let created_at = parse_timestamp(&row.created_at).map_err(&corrupt)?;

        Ok(JobError {
            id: row.id,
            job_id: row.job_id.clone(),
            item_name: row.item_name.clone(),
            code,
            message: row.message.clone(),
            context,
            created_at,
        })
    }
}

/// Formats a timestamp the way every ledger column stores it. The fixed
/// precision keeps lexical and chronological order identical.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
}
