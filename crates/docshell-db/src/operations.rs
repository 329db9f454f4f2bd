//! Database operations.

pub mod documents;
