//! Docshell Ingest - Document ingestion coordinator.
//!
//! This crate provides:
//! - Content hashing (SHA-512)
//! - A durable, no-overwrite blob store
//! - Scoped concurrent tasks with shared cancellation
//! - The coordinator that commits a document only when its metadata and blob
//!   are both persisted

mod blob;
mod coordinator;
mod error;
mod hasher;
mod tasks;

pub use blob::BlobStore;
pub use coordinator::{IngestOptions, IngestionCoordinator};
pub use error::{BlobError, BlobResult, IngestError, IngestResult, PersistenceCause};
pub use hasher::{ContentHasher, DIGEST_HEX_LEN};
pub use tasks::{ScopedTask, TaskScope, UnitError, UnitResult};
