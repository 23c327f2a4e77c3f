//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct owns a temp directory holding the blob store and
//! a file-backed SQLite database, a running `IngestService`, and one
//! provisioned tenant.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use loadfile::db::tenant_repo::{self, TenantRow};
use loadfile::service::{JobStatusReport, UploadReceipt, UploadRequest};
use loadfile::{IngestConfig, IngestService, Result};

const TERMINAL_TIMEOUT: Duration = Duration::from_secs(15);

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: IngestConfig,
    pub service: IngestService,
    pub tenant_id: String,
}

impl TestHarness {
    /// A harness with two workers.
    pub fn new() -> Self {
        Self::with_workers(2)
    }

    pub fn with_workers(worker_count: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = IngestConfig::with_paths(
            temp_dir.path().join("storage"),
            temp_dir.path().join("data").join("loadfile.db"),
        );
        config.worker_count = worker_count;
        config.queue_capacity = 16;

        let service = IngestService::open(&config).expect("Failed to open service");
        let tenant_id = Self::provision_tenant(&service, "Acme Corporation");

        Self {
            temp_dir,
            config,
            service,
            tenant_id,
        }
    }

    /// Inserts a tenant row and returns its id.
    pub fn provision_tenant(service: &IngestService, name: &str) -> String {
        let tenant = TenantRow::new(name, None);
        service
            .ledger()
            .database()
            .with_conn(|conn| tenant_repo::insert(conn, &tenant))
            .expect("Failed to insert tenant");
        tenant.id
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn upload(&self, filename: &str, content: &[u8]) -> Result<UploadReceipt> {
        self.service.upload(UploadRequest {
            tenant_id: self.tenant_id.clone(),
            filename: Some(filename.to_string()),
            media_type: None,
            reader: Cursor::new(content.to_vec()),
        })
    }

    /// Polls status until the job reaches DONE or ERROR, collecting every
    /// observed report along the way.
    pub fn wait_for_terminal(&self, job_id: &str) -> Vec<JobStatusReport> {
        let deadline = Instant::now() + TERMINAL_TIMEOUT;
        let mut seen = Vec::new();
        loop {
            let report = self
                .service
                .status(job_id)
                .expect("Status lookup failed")
                .found()
                .expect("Job disappeared");
            let terminal = report.status.is_terminal();
            seen.push(report);
            if terminal {
                return seen;
            }
            assert!(
                Instant::now() < deadline,
                "Job {} did not finish in time",
                job_id
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn final_report(&self, job_id: &str) -> JobStatusReport {
        self.wait_for_terminal(job_id)
            .pop()
            .expect("No status observed")
    }

    /// Committed blobs for the harness tenant, excluding staging files.
    pub fn stored_blobs(&self) -> Vec<PathBuf> {
        let dir = self.config.storage_root.join(&self.tenant_id);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with('.'))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn close(self) {
        self.service.close();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
