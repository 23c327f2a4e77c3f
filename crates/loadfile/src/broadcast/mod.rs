//! Broadcasting of job events for real-time consumers.

pub mod job_events;

pub use job_events::{JobEvent, JobEventBroadcaster};
