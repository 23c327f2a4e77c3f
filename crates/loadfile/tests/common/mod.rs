//! Shared test utilities for loadfile integration tests.
//!
//! This module provides:
//! - `TestHarness` for an isolated service over a temp directory
//! - Builders for zip and XML payloads

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
