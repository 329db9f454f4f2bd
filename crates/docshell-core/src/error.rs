//! Error types for Docshell.

use thiserror::Error;

/// Core error type for Docshell operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using Docshell's Error.
pub type Result<T> = std::result::Result<T, Error>;
