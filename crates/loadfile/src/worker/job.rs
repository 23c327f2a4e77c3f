use crate::orchestrator::RunOutcome;

/// Report published by a worker after it handled one job id.
#[derive(Debug, Clone, PartialEq)]
pub enum RunReport {
    /// The orchestrator returned normally.
    Finished(RunOutcome),
    /// The run panicked; the job was aborted with `INTERNAL`.
    Panicked { job_id: String, message: String },
    /// The ledger could not be read or written.
    LedgerFailed { job_id: String, message: String },
}

impl RunReport {
    pub fn job_id(&self) -> &str {
        match self {
            RunReport::Finished(outcome) => outcome.job_id(),
            RunReport::Panicked { job_id, .. } | RunReport::LedgerFailed { job_id, .. } => job_id,
        }
    }

    /// True when the job ended in `DONE` during this run.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunReport::Finished(RunOutcome::Completed { .. }))
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
