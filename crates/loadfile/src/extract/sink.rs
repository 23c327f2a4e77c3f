use thiserror::Error;

use super::xml::ValidatedItem;
use crate::jobs::Job;

/// Rejection reported by a sink. Counts as a per-item failure.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Downstream recorder for validated items.
pub trait ItemSink: Send + Sync {
    fn accept(&self, job: &Job, item: &ValidatedItem) -> Result<(), SinkError>;
}

/// Accepts and drops every item.
pub struct DiscardSink;

impl ItemSink for DiscardSink {
    fn accept(&self, job: &Job, item: &ValidatedItem) -> Result<(), SinkError> {
        log::debug!(
            "Job {}: accepted {} (<{}>, {} elements, {} bytes)",
            job.id,
            item.name,
            item.root_element,
            item.element_count,
            item.content.len()
        );
        Ok(())
    }
}
