//! Embedded graph store shared between processes.
//!
//! Nodes and edges are kept in shared-memory segments as copy-on-write
//! versions. Each process attaches an [`storage::Engine`] to the same named
//! segments and runs optimistic transactions through [`storage::Session`]s;
//! commits are validated and published under a cross-process lock.

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod storage;
pub mod types;
