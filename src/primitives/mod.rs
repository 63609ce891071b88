//! Low-level primitives for building the storage engine.
//!
//! Includes the named shared-memory segments and the cross-process commit lock.

/// Concurrency primitives and synchronization.
///
/// Shared/exclusive advisory locking with bounded waits.
pub mod concurrency;

/// Shared-memory segments.
///
/// File-backed mappings viewed as atomic word arrays.
pub mod shm;
