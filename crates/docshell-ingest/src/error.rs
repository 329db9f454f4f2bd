//! Error types for the ingestion path.

use docshell_core::CancelCause;
use docshell_db::DbError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// The single typed failure an ingestion can end with.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Rejected before any write was attempted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Hashing failed: {0}")]
    HashingFailed(#[source] std::io::Error),

    /// The same bytes were already ingested.
    #[error("Duplicate content: a document with hash {hash} already exists")]
    DuplicateContent { hash: String },

    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[source] PersistenceCause),

    /// The deadline elapsed or the ingestion was cancelled before both writes finished.
    #[error("Ingestion cancelled: {0}")]
    CancelledOrTimedOut(CancelCause),
}

impl IngestError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestError::DuplicateContent { .. })
    }

    /// Whether a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::CancelledOrTimedOut(_) | IngestError::PersistenceFailed(_)
        )
    }
}

/// Underlying fault behind [`IngestError::PersistenceFailed`].
#[derive(Error, Debug)]
pub enum PersistenceCause {
    #[error("metadata store: {0}")]
    Metadata(#[from] DbError),

    #[error("blob store: {0}")]
    Blob(#[from] BlobError),

    #[error("{unit} task aborted: {message}")]
    Task { unit: &'static str, message: String },
}

/// Errors from the blob store.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The final path is taken; publish never overwrites.
    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob write cancelled: {0}")]
    Cancelled(CancelCause),
}

impl BlobError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BlobError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<CancelCause> for BlobError {
    fn from(cause: CancelCause) -> Self {
        BlobError::Cancelled(cause)
    }
}
