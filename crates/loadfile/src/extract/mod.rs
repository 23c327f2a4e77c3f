//! Extraction pipeline: enumerate the items of a stored blob, validate each
//! one and hand it to a sink, reporting a per-item outcome as it goes.

pub mod items;
pub mod runner;
pub mod sink;
pub mod xml;

pub use crate::jobs::ItemOutcome;
pub use items::{open_items, Entry, ExtractionLimits, Item, ItemIter, DEFAULT_MAX_ITEM_BYTES};
pub use runner::{ExtractionSummary, Extractor};
pub use sink::{DiscardSink, ItemSink, SinkError};
pub use xml::{ItemValidator, ValidatedItem, XmlValidator};
