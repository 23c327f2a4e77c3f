//! Per-job driver: claims a `PENDING` job, runs extraction over its blob and
//! writes the terminal status. This is the only writer of terminal status.

pub mod progress;

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::error::LedgerError;
use crate::extract::{open_items, ExtractionLimits, ExtractionSummary, Extractor};
use crate::jobs::{ErrorCode, Job, JobLedger, JobStatus};
use crate::sanitize;
use crate::storage::{BlobKind, BlobStore};

pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};

/// What a single [`Orchestrator::run`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The job was not `PENDING` (or another run claimed it first).
    Skipped { job_id: String, status: JobStatus },
    /// Extraction finished and the job is `DONE`.
    Completed {
        job_id: String,
        summary: ExtractionSummary,
    },
    /// A structural failure ended the job in `ERROR`.
    Failed {
        job_id: String,
        code: ErrorCode,
        message: String,
    },
}

impl RunOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            RunOutcome::Skipped { job_id, .. }
            | RunOutcome::Completed { job_id, .. }
            | RunOutcome::Failed { job_id, .. } => job_id,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    ledger: JobLedger,
    store: BlobStore,
    extractor: Extractor,
    limits: ExtractionLimits,
    progress: Arc<dyn ProgressReporter>,
}

impl Orchestrator {
    pub fn new(
        ledger: JobLedger,
        store: BlobStore,
        extractor: Extractor,
        limits: ExtractionLimits,
    ) -> Self {
        Self {
            ledger,
            store,
            extractor,
            limits,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// Drives one job from `PENDING` to a terminal status. Calling it for a
    /// job that already left `PENDING` has no effect.
    ///
    /// Structural failures are recorded on the job and reported as
    /// [`RunOutcome::Failed`]; `Err` means the ledger itself could not be
    /// read or written.
    pub fn run(&self, job_id: &str) -> Result<RunOutcome, LedgerError> {
        let job = self.ledger.get(job_id)?;
        let filename = sanitize::redact_path(Path::new(&job.filename));
        let _span = info_span!("ingest",
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            filename = %filename,
        )
        .entered();

        if job.status != JobStatus::Pending {
            info!("Job is {}, nothing to do", job.status);
            return Ok(RunOutcome::Skipped {
                job_id: job.id,
                status: job.status,
            });
        }

        let job = match self.ledger.transition(&job.id, JobStatus::Processing, None) {
            Ok(job) => job,
            Err(LedgerError::IllegalTransition { from, .. }) => {
                info!("Job was claimed by another run ({})", from);
                return Ok(RunOutcome::Skipped {
                    job_id: job.id,
                    status: from,
                });
            }
            Err(e) => return Err(e),
        };
        self.progress.report(ProgressEvent::Status(&job));

        // Step 1: Resolve and open the blob
        let kind = match BlobKind::from_filename(&job.filename) {
            Some(kind) => kind,
            None => {
                return self.fail(
                    &job,
                    ErrorCode::UnsupportedMediaType,
                    &format!("cannot determine item format of '{}'", filename),
                )
            }
        };

        let file = {
            let _step = info_span!("open_blob").entered();
            match self.store.open(&job.tenant_id, &job.digest, kind) {
                Ok(file) => file,
                Err(e) => return self.fail(&job, ErrorCode::BlobUnreadable, &e.to_string()),
            }
        };

        let items = match open_items(BufReader::new(file), kind, &job.filename, self.limits) {
            Ok(items) => items,
            Err(e) => return self.fail(&job, e.code(), &e.to_string()),
        };

        // Step 2: Extract, recording each outcome as it happens
        let result = {
            let _step = info_span!("extract").entered();
            self.extractor.run(&job, items, |item_name, outcome| {
                let counters = self.ledger.record_item(&job.id, item_name, outcome)?;
                self.progress.report(ProgressEvent::Item {
                    job_id: &job.id,
                    item_name,
                    outcome,
                    counters,
                });
                Ok(())
            })
        };

        // Step 3: Terminal status
        match result {
            Ok(summary) => {
                let done =
                    self.ledger
                        .transition(&job.id, JobStatus::Done, Some(summary.counters()))?;
                info!(
                    "Job done: {} items, {} succeeded, {} failed",
                    summary.attempted, summary.succeeded, summary.failed
                );
                self.progress.report(ProgressEvent::Status(&done));
                Ok(RunOutcome::Completed {
                    job_id: done.id,
                    summary,
                })
            }
            Err(e) => self.fail(&job, e.code(), &e.to_string()),
        }
    }

    /// Forces a job that is still in flight into `ERROR` with code
    /// `INTERNAL`. Returns `None` if the job had already finished.
    pub fn abort(&self, job_id: &str, message: &str) -> Result<Option<Job>, LedgerError> {
        let job = self.ledger.get(job_id)?;
        if job.status.is_terminal() {
            return Ok(None);
        }
        if job.status == JobStatus::Pending {
            self.ledger
                .transition(job_id, JobStatus::Processing, None)?;
        }

        let failed = self.ledger.fail(job_id, ErrorCode::Internal, message)?;
        warn!(job_id = %job_id, "Job aborted: {}", message);
        self.progress.report(ProgressEvent::Status(&failed));
        Ok(Some(failed))
    }

    fn fail(&self, job: &Job, code: ErrorCode, message: &str) -> Result<RunOutcome, LedgerError> {
        warn!(code = %code, "Job failed: {}", message);
        let failed = self.ledger.fail(&job.id, code, message)?;
        self.progress.report(ProgressEvent::Status(&failed));
        Ok(RunOutcome::Failed {
            job_id: failed.id,
            code,
            message: message.to_string(),
        })
    }
}
