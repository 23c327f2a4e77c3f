pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod hasher;
pub mod jobs;
pub mod logging;
pub mod orchestrator;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod worker;

pub use broadcast::{JobEvent, JobEventBroadcaster};
pub use config::{load_config, IngestConfig};
pub use db::Database;
pub use error::{
    ConfigError, ExtractError, ItemError, LedgerError, LoadfileError, Result, StorageError,
    UploadError, WorkerError,
};
pub use extract::{Extractor, ItemSink, ItemValidator, XmlValidator};
pub use hasher::Fingerprint;
pub use jobs::{ErrorCode, Job, JobError, JobLedger, JobQuery, JobStatus};
pub use logging::init_logging;
pub use orchestrator::{Orchestrator, RunOutcome};
pub use service::{IngestService, JobStatusReport, StatusLookup, UploadReceipt, UploadRequest};
pub use storage::{BlobKind, BlobStore};
pub use worker::WorkerPool;
