#![forbid(unsafe_code)]

//! Read-only inspection of shared segment pairs.
//!
//! Reports are built by attaching to existing segments; nothing is written
//! and no transaction is opened.

mod error;
mod stats;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Statistics collection and reporting.
pub use stats::{stats, LockSection, SegmentFiles, StatsReport, UsageSection};
