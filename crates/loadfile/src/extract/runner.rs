use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info_span, warn};

use super::items::{Entry, Item};
use super::sink::{DiscardSink, ItemSink};
use super::xml::{ItemValidator, XmlValidator};
use crate::error::{ExtractError, ItemError};
use crate::jobs::{ErrorCode, ItemCounters, ItemOutcome, Job};

/// Tally of the items one run attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSummary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ExtractionSummary {
    fn record(&mut self, outcome: &ItemOutcome) {
        self.attempted += 1;
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn counters(&self) -> ItemCounters {
        ItemCounters {
            total: self.attempted,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }
}

/// Drives items through validation and into the sink.
#[derive(Clone)]
pub struct Extractor {
    validator: Arc<dyn ItemValidator>,
    sink: Arc<dyn ItemSink>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(Arc::new(XmlValidator::new()), Arc::new(DiscardSink))
    }
}

impl Extractor {
    pub fn new(validator: Arc<dyn ItemValidator>, sink: Arc<dyn ItemSink>) -> Self {
        Self { validator, sink }
    }

    /// Processes every entry, handing each outcome to `observer` before
    /// moving on. Per-item failures are reported and skipped; an `Err` from
    /// the entry stream or from the observer stops the run.
    pub fn run<I, F>(
        &self,
        job: &Job,
        entries: I,
        mut observer: F,
    ) -> Result<ExtractionSummary, ExtractError>
    where
        I: IntoIterator<Item = Result<Entry, ExtractError>>,
        F: FnMut(&str, &ItemOutcome) -> Result<(), ExtractError>,
    {
        let mut summary = ExtractionSummary::default();

        for entry in entries {
            let (name, outcome) = match entry? {
                Entry::Item(item) => {
                    let name = item.name.clone();
                    let outcome = self.process_item(job, item);
                    (name, outcome)
                }
                Entry::Unreadable { name, error } => (name, ItemOutcome::Failed(error)),
            };

            if let ItemOutcome::Failed(error) = &outcome {
                warn!(job_id = %job.id, item = %name, code = %error.code, "{}", error.message);
            }

            observer(&name, &outcome)?;
            summary.record(&outcome);
        }

        Ok(summary)
    }

    fn process_item(&self, job: &Job, item: Item) -> ItemOutcome {
        let _span = info_span!("item", name = %item.name, bytes = item.content.len()).entered();

        if !has_xml_extension(&item.name) {
            return ItemOutcome::Failed(ItemError::new(
                ErrorCode::UnsupportedItem,
                format!("'{}' is not an .xml document", item.name),
            ));
        }

        let validated = match self.validator.validate(item) {
            Ok(v) => v,
            Err(e) => return ItemOutcome::Failed(e),
        };

        match self.sink.accept(job, &validated) {
            Ok(()) => ItemOutcome::Succeeded,
            Err(e) => ItemOutcome::Failed(ItemError::new(ErrorCode::SinkRejected, e.message)),
        }
    }
}

fn has_xml_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
}
