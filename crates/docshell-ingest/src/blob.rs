//! Durable blob storage under a volume directory.
//!
//! A blob is written to a temporary file next to its destination, synced,
//! closed and then renamed into place. The final path either does not exist
//! or holds the complete payload. A process crash can leave a `.upload-*`
//! temporary file behind; it is never visible under a final name and is left
//! for out-of-band cleanup.

use crate::error::{BlobError, BlobResult};
use docshell_core::{normalize_target_path, validate_filename, CancelScope};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Filesystem blob store rooted at a volume directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a store, creating the volume directory if missing.
    pub fn new<P: AsRef<Path>>(root: P) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| BlobError::io(&root, e))?;
        debug!("Blob volume at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a volume-relative path. Absolute paths and `..` are rejected.
    pub fn resolve(&self, rel_path: &str) -> BlobResult<PathBuf> {
        let clean = normalize_target_path(rel_path)
            .map_err(|e| BlobError::InvalidPath(e.to_string()))?;
        if clean.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(clean))
        }
    }

    /// Durably publish `bytes` as `dest_dir/filename` and return that
    /// volume-relative location.
    ///
    /// Publish never overwrites an existing file. The scope is checked between
    /// every step; if it is cancelled once the file is published, the file is
    /// removed again and the cancellation is returned.
    pub fn put(
        &self,
        scope: &CancelScope,
        dest_dir: &str,
        bytes: &[u8],
        filename: &str,
    ) -> BlobResult<String> {
        validate_filename(filename).map_err(|e| BlobError::InvalidPath(e.to_string()))?;
        let rel_dir = normalize_target_path(dest_dir)
            .map_err(|e| BlobError::InvalidPath(e.to_string()))?;
        let dir = self.resolve(&rel_dir)?;
        let final_path = dir.join(filename);

        scope.check()?;
        fs::create_dir_all(&dir).map_err(|e| BlobError::io(&dir, e))?;

        scope.check()?;
        let mut temp = tempfile::Builder::new()
            .prefix(".upload-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| BlobError::io(&dir, e))?;
        temp.write_all(bytes)
            .map_err(|e| BlobError::io(temp.path(), e))?;

        scope.check()?;
        temp.as_file()
            .sync_all()
            .map_err(|e| BlobError::io(temp.path(), e))?;

        scope.check()?;
        // Closes the handle; the file is still removed on drop until persisted.
        let temp_path = temp.into_temp_path();
        temp_path.persist_noclobber(&final_path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                BlobError::DestinationExists(final_path.clone())
            } else {
                BlobError::io(&final_path, e.error)
            }
        })?;
        sync_dir(&dir);

        self.confirm_publish(scope, &final_path)?;

        let location = if rel_dir.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", rel_dir, filename)
        };
        debug!("Published blob {} ({} bytes)", location, bytes.len());
        Ok(location)
    }

    /// Publish is provisional: a cancellation seen after the rename unpublishes.
    fn confirm_publish(&self, scope: &CancelScope, final_path: &Path) -> BlobResult<()> {
        if let Err(cause) = scope.check() {
            debug!(
                "Scope cancelled after publish, removing {}",
                final_path.display()
            );
            if let Err(e) = fs::remove_file(final_path) {
                warn!(
                    "Failed to remove cancelled blob {}: {}",
                    final_path.display(),
                    e
                );
            }
            return Err(BlobError::Cancelled(cause));
        }
        Ok(())
    }

    /// Remove a published blob. Returns false if it did not exist.
    pub fn remove(&self, rel_path: &str) -> BlobResult<bool> {
        let path = self.resolve_file(rel_path)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::io(path, e)),
        }
    }

    /// Open a blob read-only for streaming.
    pub fn open(&self, rel_path: &str) -> BlobResult<File> {
        let path = self.resolve_file(rel_path)?;
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BlobError::NotFound(rel_path.to_string())
            } else {
                BlobError::io(path, e)
            }
        })
    }

    pub fn read(&self, rel_path: &str) -> BlobResult<Vec<u8>> {
        let path = self.resolve_file(rel_path)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BlobError::NotFound(rel_path.to_string())
            } else {
                BlobError::io(path, e)
            }
        })
    }

    pub fn exists(&self, rel_path: &str) -> bool {
        self.resolve_file(rel_path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    fn resolve_file(&self, rel_path: &str) -> BlobResult<PathBuf> {
        let path = self.resolve(rel_path)?;
        if path == self.root {
            return Err(BlobError::InvalidPath(format!(
                "Not a file path: '{}'",
                rel_path
            )));
        }
        Ok(path)
    }
}

/// Persist the rename itself. Failure only weakens durability, so it is logged.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!("Failed to sync directory {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
