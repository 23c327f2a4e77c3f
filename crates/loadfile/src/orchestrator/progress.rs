use chrono::Utc;

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::jobs::{ItemCounters, ItemOutcome, Job};

/// Events emitted by the orchestrator while it drives a job.
/// Item content is never included.
pub enum ProgressEvent<'a> {
    /// The job reached a new status; carries the job as stored.
    Status(&'a Job),
    Item {
        job_id: &'a str,
        item_name: &'a str,
        outcome: &'a ItemOutcome,
        counters: ItemCounters,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent<'_>);
}

/// No-op reporter.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent<'_>) {}
}

/// Bridges orchestrator events onto a [`JobEventBroadcaster`].
pub struct BroadcastProgress {
    broadcaster: JobEventBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: JobEventBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent<'_>) {
        let event = match event {
            ProgressEvent::Status(job) => JobEvent::StatusChanged {
                job_id: job.id.clone(),
                filename: job.filename.clone(),
                status: job.status,
                counters: job.counters,
                error: job.error.clone(),
                timestamp: Utc::now(),
            },
            ProgressEvent::Item {
                job_id,
                item_name,
                outcome,
                counters,
            } => JobEvent::ItemRecorded {
                job_id: job_id.to_string(),
                item_name: item_name.to_string(),
                succeeded: outcome.is_success(),
                code: match outcome {
                    ItemOutcome::Succeeded => None,
                    ItemOutcome::Failed(e) => Some(e.code),
                },
                counters,
                timestamp: Utc::now(),
            },
        };
        self.broadcaster.send(event);
    }
}
