//! Upload and status operations consumed by request handlers.

use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, info_span, warn};

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::config::IngestConfig;
use crate::db::Database;
use crate::error::{Result, UploadError, WorkerError};
use crate::extract::{DiscardSink, ExtractionLimits, Extractor, ItemSink, XmlValidator};
use crate::jobs::{
    CreateOutcome, Job, JobError, JobLedger, JobPage, JobQuery, JobStatus, NewJob,
};
use crate::orchestrator::{BroadcastProgress, Orchestrator};
use crate::sanitize;
use crate::storage::{BlobKind, BlobStore};
use crate::worker::WorkerPool;

/// One client upload. `reader` is consumed exactly once.
pub struct UploadRequest<R: Read> {
    pub tenant_id: String,
    /// Declared client filename; only its final path segment is kept.
    pub filename: Option<String>,
    pub media_type: Option<String>,
    pub reader: R,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub job_id: String,
    pub status: JobStatus,
    /// True when the tenant had already uploaded identical bytes.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_id: String,
    pub tenant_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub items_total: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Counter names used by older status consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LegacyCounts {
    pub processed_xmls: u64,
    pub inserted_xmls: u64,
    pub error_xmls: u64,
}

impl JobStatusReport {
    fn new(job: Job, error_count: u64) -> Self {
        Self {
            job_id: job.id,
            tenant_id: job.tenant_id,
            filename: job.filename,
            status: job.status,
            items_total: job.counters.total,
            items_succeeded: job.counters.succeeded,
            items_failed: job.counters.failed,
            error_count,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }

    pub fn legacy_counts(&self) -> LegacyCounts {
        LegacyCounts {
            processed_xmls: self.items_total,
            inserted_xmls: self.items_succeeded,
            error_xmls: self.items_failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusLookup {
    Found(JobStatusReport),
    NotFound { job_id: String },
}

impl StatusLookup {
    pub fn found(self) -> Option<JobStatusReport> {
        match self {
            StatusLookup::Found(report) => Some(report),
            StatusLookup::NotFound { .. } => None,
        }
    }
}

pub struct IngestService {
    ledger: JobLedger,
    store: BlobStore,
    pool: WorkerPool,
    events: JobEventBroadcaster,
}

impl IngestService {
    /// Opens the database and storage named by `config` and starts the
    /// worker pool. Items are validated as XML and dropped after validation.
    pub fn open(config: &IngestConfig) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        Self::with_sink(config, db, Arc::new(DiscardSink))
    }

    /// Like [`open`](Self::open) with an existing database and a caller
    /// supplied sink.
    pub fn with_sink(config: &IngestConfig, db: Database, sink: Arc<dyn ItemSink>) -> Result<Self> {
        crate::config::validate_config(config)?;

        let validator = match &config.extraction.expected_root {
            Some(root) => XmlValidator::with_expected_root(root)?,
            None => XmlValidator::new(),
        };
        let extractor = Extractor::new(Arc::new(validator), sink);

        Self::with_components(
            db,
            BlobStore::new(&config.storage_root),
            extractor,
            config.extraction.limits(),
            config.worker_count,
            config.queue_capacity,
        )
    }

    pub fn with_components(
        db: Database,
        store: BlobStore,
        extractor: Extractor,
        limits: ExtractionLimits,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self> {
        let ledger = JobLedger::new(db);
        let events = JobEventBroadcaster::default();
        let orchestrator = Orchestrator::new(ledger.clone(), store.clone(), extractor, limits)
            .with_progress(Arc::new(BroadcastProgress::new(events.clone())));
        let pool = WorkerPool::new(orchestrator, worker_count, queue_capacity)?;

        info!(
            "Ingest service ready (storage: {})",
            sanitize::redact_path(store.root())
        );

        Ok(Self {
            ledger,
            store,
            pool,
            events,
        })
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Accepts an upload: fingerprint, dedupe, persist, record and queue.
    ///
    /// Identical bytes from the same tenant always resolve to the same job,
    /// without a second row or a second blob.
    pub fn upload<R: Read>(&self, request: UploadRequest<R>) -> Result<UploadReceipt> {
        let UploadRequest {
            tenant_id,
            filename,
            media_type,
            mut reader,
        } = request;

        let filename = filename
            .as_deref()
            .map(sanitize::base_filename)
            .filter(|f| !f.trim().is_empty())
            .ok_or(UploadError::MissingFilename)?
            .to_string();
        let _span = info_span!("upload", tenant_id = %tenant_id, filename = %filename).entered();

        let kind = BlobKind::from_filename(&filename)
            .ok_or_else(|| UploadError::DisallowedExtension(filename.clone()))?;

        if !self.ledger.tenant_exists(&tenant_id)? {
            return Err(UploadError::UnknownTenant(tenant_id).into());
        }

        // Step 1: Stream to a temp file while fingerprinting
        let staged = self
            .store
            .stage(&tenant_id, &mut reader)
            .map_err(UploadError::ReadStream)?;
        if staged.size() == 0 {
            return Err(UploadError::EmptyFile(filename).into());
        }

        // Step 2: Idempotency gate
        if let Some(existing) = self.ledger.find_existing(&tenant_id, staged.fingerprint())? {
            info!("Duplicate upload, returning job {}", existing.id);
            return Ok(UploadReceipt {
                job_id: existing.id,
                status: existing.status,
                deduplicated: true,
            });
        }

        // Step 3: Record the job; a concurrent twin may win here
        let media_type = media_type.or_else(|| {
            mime_guess::from_path(&filename)
                .first_raw()
                .map(str::to_string)
        });
        let outcome = self.ledger.create(NewJob {
            tenant_id: tenant_id.clone(),
            digest: staged.fingerprint().clone(),
            filename,
            media_type,
            size_bytes: staged.size(),
        })?;

        let job = match outcome {
            CreateOutcome::Existing(job) => {
                info!("Lost creation race, returning job {}", job.id);
                return Ok(UploadReceipt {
                    job_id: job.id,
                    status: job.status,
                    deduplicated: true,
                });
            }
            CreateOutcome::Created(job) => job,
        };

        // Step 4: Commit the blob, then hand the job to the workers without
        // waiting for queue space
        let committed = self.store.commit(staged, kind);
        match self.pool.try_submit(&job.id) {
            Ok(()) => {}
            Err(WorkerError::QueueFull(_)) => {
                warn!("Queue full, job {} stays PENDING until resume_pending", job.id);
            }
            Err(e) => warn!("Job {} stays PENDING, queue unavailable: {}", job.id, e),
        }
        committed?;

        info!("Accepted upload as job {}", job.id);
        Ok(UploadReceipt {
            job_id: job.id,
            status: job.status,
            deduplicated: false,
        })
    }

    /// Current state of a job. A missing job is a normal answer, not an error.
    pub fn status(&self, job_id: &str) -> Result<StatusLookup> {
        let Some(job) = self.ledger.find(job_id)? else {
            return Ok(StatusLookup::NotFound {
                job_id: job_id.to_string(),
            });
        };
        let error_count = self.ledger.error_count(&job.id)?;
        Ok(StatusLookup::Found(JobStatusReport::new(job, error_count)))
    }

    pub fn errors(&self, job_id: &str) -> Result<Vec<JobError>> {
        Ok(self.ledger.errors(job_id)?)
    }

    pub fn list_jobs(&self, query: &JobQuery) -> Result<JobPage> {
        Ok(self.ledger.list(query)?)
    }

    /// Re-queues every `PENDING` job, e.g. after a restart or after uploads
    /// found the queue full. Blocks while the queue is full. Returns how
    /// many were submitted.
    pub fn resume_pending(&self) -> Result<usize> {
        let ids = self.ledger.list_by_status(JobStatus::Pending)?;
        for id in &ids {
            self.pool.submit(id)?;
        }
        if !ids.is_empty() {
            info!("Resubmitted {} pending jobs", ids.len());
        }
        Ok(ids.len())
    }

    /// Stops taking work, lets queued jobs finish and joins the workers.
    pub fn close(self) {
        self.pool.wait();
    }

    /// Stops after in-flight jobs; queued jobs stay `PENDING`.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("storage_root", &self.store.root())
            .field("workers", &self.pool.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tenant_repo::{self, TenantRow};
    use crate::error::LoadfileError;
    use std::io::Cursor;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn service() -> (TempDir, IngestService, String) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantRow::new("Acme", None);
        db.with_conn(|conn| tenant_repo::insert(conn, &tenant))
            .unwrap();
        let service = IngestService::with_components(
            db,
            BlobStore::new(dir.path().join("storage")),
            Extractor::default(),
            ExtractionLimits::default(),
            2,
            8,
        )
        .unwrap();
        (dir, service, tenant.id)
    }

    fn request<'a>(tenant: &str, filename: &str, bytes: &'a [u8]) -> UploadRequest<Cursor<&'a [u8]>> {
        UploadRequest {
            tenant_id: tenant.to_string(),
            filename: Some(filename.to_string()),
            media_type: None,
            reader: Cursor::new(bytes),
        }
    }

    fn wait_terminal(service: &IngestService, job_id: &str) -> JobStatusReport {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let report = service.status(job_id).unwrap().found().unwrap();
            if report.status.is_terminal() || Instant::now() > deadline {
                return report;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_upload_and_complete() {
        let (_dir, service, tenant) = service();
        let receipt = service
            .upload(request(&tenant, "invoice.xml", b"<Comprobante/>"))
            .unwrap();
        assert!(!receipt.deduplicated);
        assert_eq!(receipt.status, JobStatus::Pending);

        let report = wait_terminal(&service, &receipt.job_id);
        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(
            report.legacy_counts(),
            LegacyCounts {
                processed_xmls: 1,
                inserted_xmls: 1,
                error_xmls: 0
            }
        );
        assert_eq!(report.error_count, 0);
        service.close();
    }

    #[test]
    fn test_duplicate_upload_returns_same_job() {
        let (_dir, service, tenant) = service();
        let first = service
            .upload(request(&tenant, "invoice.xml", b"<a/>"))
            .unwrap();
        let second = service
            .upload(request(&tenant, "renamed.xml", b"<a/>"))
            .unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert!(second.deduplicated);
        assert_eq!(service.list_jobs(&JobQuery::default()).unwrap().total, 1);
        service.close();
    }

    #[test]
    fn test_client_errors_create_no_job() {
        let (_dir, service, tenant) = service();

        let missing = service.upload(UploadRequest {
            tenant_id: tenant.clone(),
            filename: None,
            media_type: None,
            reader: Cursor::new(b"<a/>".as_slice()),
        });
        assert!(matches!(
            missing,
            Err(LoadfileError::Upload(UploadError::MissingFilename))
        ));

        let bad_ext = service.upload(request(&tenant, "report.pdf", b"%PDF"));
        assert!(matches!(
            bad_ext,
            Err(LoadfileError::Upload(UploadError::DisallowedExtension(_)))
        ));

        let unknown = service.upload(request("ghost", "a.xml", b"<a/>"));
        assert!(matches!(
            unknown,
            Err(LoadfileError::Upload(UploadError::UnknownTenant(_)))
        ));

        let empty = service.upload(request(&tenant, "a.xml", b""));
        assert!(matches!(
            empty,
            Err(LoadfileError::Upload(UploadError::EmptyFile(_)))
        ));

        assert_eq!(service.list_jobs(&JobQuery::default()).unwrap().total, 0);
        service.close();
    }

    #[test]
    fn test_filename_path_is_stripped() {
        let (_dir, service, tenant) = service();
        let receipt = service
            .upload(request(&tenant, "../../etc/invoice.xml", b"<a/>"))
            .unwrap();
        let report = service.status(&receipt.job_id).unwrap().found().unwrap();
        assert_eq!(report.filename, "invoice.xml");
        service.close();
    }

    /// Holds every item until the test drops the sender.
    struct GatedSink {
        gate: crossbeam_channel::Receiver<()>,
    }

    impl ItemSink for GatedSink {
        fn accept(&self, _job: &Job, _item: &crate::extract::ValidatedItem) -> std::result::Result<(), crate::extract::SinkError> {
            let _ = self.gate.recv();
            Ok(())
        }
    }

    #[test]
    fn test_upload_does_not_wait_for_queue_space() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantRow::new("Acme", None);
        db.with_conn(|conn| tenant_repo::insert(conn, &tenant))
            .unwrap();
        let (release, gate) = crossbeam_channel::unbounded::<()>();
        let extractor = Extractor::new(Arc::new(XmlValidator::new()), Arc::new(GatedSink { gate }));
        let service = IngestService::with_components(
            db,
            BlobStore::new(dir.path().join("storage")),
            extractor,
            ExtractionLimits::default(),
            1,
            1,
        )
        .unwrap();

        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        std::thread::scope(|scope| {
            let service = &service;
            let tenant_id = tenant.id.clone();
            scope.spawn(move || {
                let ids: Vec<String> = (0..4)
                    .map(|i| {
                        let body = format!("<doc n=\"{}\"/>", i);
                        service
                            .upload(request(&tenant_id, "doc.xml", body.as_bytes()))
                            .unwrap()
                            .job_id
                    })
                    .collect();
                let _ = done_tx.send(ids);
            });

            let ids = done_rx.recv_timeout(Duration::from_secs(5));
            drop(release);
            let ids = ids.expect("upload waited on a full queue");
            assert_eq!(ids.len(), 4);
        });

        // Uploads refused by the full queue are still PENDING and resumable.
        service.resume_pending().unwrap();
        let page = service.list_jobs(&JobQuery::default()).unwrap();
        assert_eq!(page.total, 4);
        for job in &page.jobs {
            assert_eq!(wait_terminal(&service, &job.id).status, JobStatus::Done);
        }
        service.close();
    }

    #[test]
    fn test_status_not_found() {
        let (_dir, service, _) = service();
        assert_eq!(
            service.status("missing").unwrap(),
            StatusLookup::NotFound {
                job_id: "missing".to_string()
            }
        );
        service.close();
    }

    #[test]
    fn test_status_report_serialization() {
        let (_dir, service, tenant) = service();
        let receipt = service
            .upload(request(&tenant, "invoice.xml", b"<a/>"))
            .unwrap();
        let report = wait_terminal(&service, &receipt.job_id);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "DONE");
        assert_eq!(json["itemsSucceeded"], 1);
        assert_eq!(json["errorCount"], 0);
        let legacy = serde_json::to_value(report.legacy_counts()).unwrap();
        assert_eq!(legacy["processed_xmls"], 1);
        service.close();
    }
}
