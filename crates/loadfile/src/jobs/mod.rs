//! Job records, their lifecycle and the ledger that persists them.

pub mod ledger;
pub mod model;

pub use ledger::{CreateOutcome, JobLedger, JobPage, JobQuery};
pub use model::{ErrorCode, ItemCounters, ItemOutcome, Job, JobError, JobStatus, NewJob};
