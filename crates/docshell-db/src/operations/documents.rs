//! Document metadata operations.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::scan::{scan_all, scan_one};
use chrono::{DateTime, Utc};
use docshell_core::{CancelCause, CancelScope, DocumentId, DocumentRecord, NewDocument, UserId};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

const DOCUMENT_COLUMNS: &str =
    "id, author_id, uploader_id, title, size, path, hash, created_at, changed_at";

impl Database {
    /// Insert a document and return the row as persisted.
    ///
    /// A hash that is already stored yields [`DbError::Conflict`].
    pub fn insert_document(&self, doc: &NewDocument) -> DbResult<DocumentRecord> {
        let conn = self.conn()?;
        insert_returning(&conn, doc)
    }

    /// Insert a document on behalf of a cancellable ingestion.
    ///
    /// The insert commits on its own, so the write lock is held only for the
    /// statement. Waiting for a pooled connection or for another writer is
    /// bounded by the scope's deadline, and a wait cut short by the scope is
    /// reported as [`DbError::Cancelled`]. Undoing the row when sibling work
    /// fails is up to the caller, via [`Database::delete_document`].
    pub fn insert_document_scoped(
        &self,
        doc: &NewDocument,
        scope: &CancelScope,
    ) -> DbResult<DocumentRecord> {
        scope.check()?;

        let conn = self
            .conn_within(scope.remaining())
            .map_err(|e| cancelled_or(scope, e))?;
        scope.check()?;

        // Shorten the busy wait to what is left of the deadline.
        let bounded = scope
            .remaining()
            .filter(|remaining| *remaining < self.busy_timeout());
        if let Some(remaining) = bounded {
            conn.busy_timeout(remaining)?;
        }
        let result = insert_returning(&conn, doc);
        if bounded.is_some() {
            if let Err(e) = conn.busy_timeout(self.busy_timeout()) {
                warn!("Failed to restore busy timeout: {}", e);
            }
        }

        match result {
            Ok(record) => {
                debug!("Inserted document {} ({})", record.id, record.title);
                Ok(record)
            }
            Err(e) if e.is_busy() => {
                if bounded.is_some() {
                    scope.cancel(CancelCause::DeadlineExceeded);
                }
                Err(cancelled_or(scope, e))
            }
            Err(e) => Err(e),
        }
    }

    /// All documents, ordered by id.
    pub fn find_all_documents(&self) -> DbResult<Vec<DocumentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents ORDER BY id",
            DOCUMENT_COLUMNS
        ))?;
        let rows = stmt.query([])?;
        scan_all(rows, row_to_document)
    }

    /// Get a document by id, `None` when no row matches.
    pub fn find_document_by_id(&self, id: DocumentId) -> DbResult<Option<DocumentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE id = ?1",
            DOCUMENT_COLUMNS
        ))?;
        let rows = stmt.query(params![id])?;
        scan_one(rows, row_to_document)
    }

    /// Find a document by content hash.
    pub fn find_document_by_hash(&self, hash: &str) -> DbResult<Option<DocumentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE hash = ?1",
            DOCUMENT_COLUMNS
        ))?;
        let rows = stmt.query(params![hash])?;
        scan_one(rows, row_to_document)
    }

    pub fn find_documents_by_author(&self, author_id: UserId) -> DbResult<Vec<DocumentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE author_id = ?1 ORDER BY id",
            DOCUMENT_COLUMNS
        ))?;
        let rows = stmt.query(params![author_id])?;
        scan_all(rows, row_to_document)
    }

    pub fn find_documents_by_uploader(
        &self,
        uploader_id: UserId,
    ) -> DbResult<Vec<DocumentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE uploader_id = ?1 ORDER BY id",
            DOCUMENT_COLUMNS
        ))?;
        let rows = stmt.query(params![uploader_id])?;
        scan_all(rows, row_to_document)
    }

    /// Delete a document row by id.
    pub fn delete_document(&self, id: DocumentId) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Document not found: {}", id)));
        }

        Ok(())
    }
}

/// Report an error as the scope's cancellation once the scope is cancelled.
fn cancelled_or(scope: &CancelScope, err: DbError) -> DbError {
    match scope.check() {
        Err(cause) => DbError::Cancelled(cause),
        Ok(()) => err,
    }
}

fn insert_returning(conn: &Connection, doc: &NewDocument) -> DbResult<DocumentRecord> {
    let mut stmt = conn.prepare(&format!(
        r#"
        INSERT INTO documents (author_id, uploader_id, title, size, path, hash)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    ))?;
    let rows = stmt.query(params![
        doc.author_id,
        doc.uploader_id,
        doc.title,
        doc.size,
        doc.path,
        doc.hash,
    ])?;

    scan_one(rows, row_to_document)?
        .ok_or_else(|| DbError::Other("Insert returned no row".to_string()))
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        author_id: row.get(1)?,
        uploader_id: row.get(2)?,
        title: row.get(3)?,
        size: row.get(4)?,
        path: row.get(5)?,
        hash: row.get(6)?,
        created_at: parse_timestamp(row, 7)?,
        changed_at: parse_timestamp(row, 8)?,
    })
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
