//! Job event broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::jobs::{ErrorCode, ItemCounters, JobStatus};

/// An event in the life of one job.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    /// The job moved to a new status.
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        job_id: String,
        filename: String,
        status: JobStatus,
        counters: ItemCounters,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// One item was attempted.
    #[serde(rename_all = "camelCase")]
    ItemRecorded {
        job_id: String,
        item_name: String,
        succeeded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        counters: ItemCounters,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::StatusChanged { job_id, .. } | JobEvent::ItemRecorded { job_id, .. } => {
                job_id
            }
        }
    }
}

/// Broadcasts job events to any number of subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
