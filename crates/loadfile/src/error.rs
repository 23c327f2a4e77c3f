use std::path::PathBuf;
use thiserror::Error;

use crate::jobs::{ErrorCode, JobStatus};

#[derive(Error, Debug)]
pub enum LoadfileError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Upload rejected: {0}")]
    Upload(#[from] UploadError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open blob '{path}': {source}")]
    OpenBlob {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tenant id for storage: '{0}'")]
    InvalidTenant(String),

    #[error("Unsupported file extension for '{0}'")]
    UnsupportedExtension(String),

    #[error("Digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} is {status}, expected PROCESSING")]
    NotProcessing { job_id: String, status: JobStatus },

    #[error("Corrupt job row '{job_id}': {reason}")]
    CorruptRow { job_id: String, reason: String },
}

/// Client input errors surfaced synchronously by the upload operation.
/// A job is never created when one of these is returned.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("A .zip or .xml file is required")]
    MissingFilename,

    #[error("Uploaded file '{0}' is empty")]
    EmptyFile(String),

    #[error("File extension not allowed for '{0}' (expected .zip or .xml)")]
    DisallowedExtension(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Failed to read upload stream: {0}")]
    ReadStream(#[source] StorageError),
}

/// Failures that abort a whole job. Per-item failures are [`ItemError`]s.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to open archive '{name}': {reason}")]
    CorruptArchive { name: String, reason: String },

    #[error("Failed to read blob '{name}': {source}")]
    ReadBlob {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to record item outcome: {0}")]
    Ledger(#[from] LedgerError),
}

impl ExtractError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExtractError::CorruptArchive { .. } => ErrorCode::ArchiveCorrupt,
            ExtractError::ReadBlob { .. } => ErrorCode::BlobUnreadable,
            ExtractError::Ledger(_) => ErrorCode::StorageFailure,
        }
    }
}

/// A failure local to one item. Recorded as a JobError; never aborts the job.
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct ItemError {
    pub code: ErrorCode,
    pub message: String,
    pub context: serde_json::Value,
}

impl ItemError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job queue is full, job {0} left PENDING")]
    QueueFull(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, LoadfileError>;
