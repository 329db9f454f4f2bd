//! Generic materialization of query results.
//!
//! Both functions abort on the first row-mapping error and return it; rows
//! already mapped are discarded.

use crate::error::DbResult;
use rusqlite::{Row, Rows};

/// Map the first row of a result set, or `None` if it is empty.
///
/// Additional rows are ignored. Use a query that yields at most one row.
pub fn scan_one<T, F>(mut rows: Rows<'_>, mut mapper: F) -> DbResult<Option<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    match rows.next()? {
        Some(row) => Ok(Some(mapper(row)?)),
        None => Ok(None),
    }
}

/// Map every row in order. An empty result set yields an empty vector.
pub fn scan_all<T, F>(mut rows: Rows<'_>, mut mapper: F) -> DbResult<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(mapper(row)?);
    }
    Ok(items)
}
