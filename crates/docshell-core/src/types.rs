//! Core domain types for Docshell.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the metadata store on insert.
pub type DocumentId = i64;

/// Reference to a user (author or uploader).
pub type UserId = i64;

/// A stored document as persisted in the metadata store.
///
/// The blob lives at [`DocumentRecord::location`], relative to the volume root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub author_id: UserId,
    pub uploader_id: UserId,
    pub title: String,
    pub size: i64,
    pub path: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Volume-relative location of the published blob.
    pub fn location(&self) -> String {
        join_location(&self.path, &self.title)
    }

    /// First characters of the digest, for display.
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }
}

/// An incoming upload, consumed once by the ingestion coordinator.
#[derive(Debug, Clone)]
pub struct DocumentCreationRequest {
    pub author_id: UserId,
    pub uploader_id: UserId,
    /// Volume-relative directory the blob is published into.
    pub target_path: String,
    pub payload: Vec<u8>,
    /// Original filename; becomes the document title and the published file name.
    pub filename: String,
}

impl DocumentCreationRequest {
    pub fn new(
        author_id: UserId,
        uploader_id: UserId,
        target_path: impl Into<String>,
        filename: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            author_id,
            uploader_id,
            target_path: target_path.into(),
            payload: payload.into(),
            filename: filename.into(),
        }
    }

    /// Payload length in bytes.
    pub fn size(&self) -> i64 {
        self.payload.len() as i64
    }

    /// Check the filename and target path, returning the normalized target path.
    pub fn validate(&self) -> Result<String> {
        validate_filename(&self.filename)?;
        normalize_target_path(&self.target_path)
    }
}

/// Row data for a document insert; everything except store-assigned fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub author_id: UserId,
    pub uploader_id: UserId,
    pub title: String,
    pub size: i64,
    pub path: String,
    pub hash: String,
}

impl NewDocument {
    /// Build insert data from a request, its normalized target path and digest.
    pub fn from_request(
        request: &DocumentCreationRequest,
        path: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            author_id: request.author_id,
            uploader_id: request.uploader_id,
            title: request.filename.clone(),
            size: request.size(),
            path: path.into(),
            hash: hash.into(),
        }
    }

    pub fn location(&self) -> String {
        join_location(&self.path, &self.title)
    }
}

/// Clean a volume-relative directory path.
///
/// Drops empty and `.` components. Absolute paths and `..` are rejected so a
/// request can never address anything outside the volume. An empty result
/// means the volume root.
pub fn normalize_target_path(path: &str) -> Result<String> {
    let path = path.replace('\\', "/");
    if path.starts_with('/') {
        return Err(Error::InvalidInput(format!(
            "Target path must be relative: {}",
            path
        )));
    }

    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidInput(format!(
                    "Target path must not contain '..': {}",
                    path
                )))
            }
            p => parts.push(p),
        }
    }

    Ok(parts.join("/"))
}

/// A filename must be a single, non-special path component.
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidInput(format!("Invalid filename: '{}'", name)));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "Filename must not contain path separators: '{}'",
            name
        )));
    }
    Ok(())
}

fn join_location(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target_path() {
        assert_eq!(normalize_target_path("reports/2024").unwrap(), "reports/2024");
        assert_eq!(normalize_target_path("./a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(normalize_target_path("").unwrap(), "");
        assert_eq!(normalize_target_path(".").unwrap(), "");
        assert_eq!(normalize_target_path("win\\style").unwrap(), "win/style");
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        assert!(normalize_target_path("/etc").is_err());
        assert!(normalize_target_path("a/../../b").is_err());
        assert!(normalize_target_path("..").is_err());
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("note.txt").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("a/b.txt").is_err());
    }

    #[test]
    fn test_request_to_new_document() {
        let request = DocumentCreationRequest::new(1, 2, "./inbox", "note.txt", "hello docs");
        let path = request.validate().unwrap();
        let doc = NewDocument::from_request(&request, path, "abc");

        assert_eq!(doc.title, "note.txt");
        assert_eq!(doc.size, 10);
        assert_eq!(doc.path, "inbox");
        assert_eq!(doc.location(), "inbox/note.txt");
    }

    #[test]
    fn test_location_at_volume_root() {
        let doc = NewDocument {
            author_id: 1,
            uploader_id: 1,
            title: "root.txt".to_string(),
            size: 0,
            path: String::new(),
            hash: "00".to_string(),
        };
        assert_eq!(doc.location(), "root.txt");
    }
}
