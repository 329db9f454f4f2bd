//! Docshell DB - Document metadata store on SQLite.

mod database;
mod error;
mod migrations;
mod operations;
pub mod scan;

pub use database::{Database, DbOptions, PooledConn};
pub use error::{DbError, DbResult};
pub use scan::{scan_all, scan_one};
