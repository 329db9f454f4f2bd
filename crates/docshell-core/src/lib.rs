//! Docshell Core - Domain types and coordination primitives for document ingestion.

mod error;
mod scope;
mod types;

pub use error::{Error, Result};
pub use scope::{CancelCause, CancelScope};
pub use types::*;
