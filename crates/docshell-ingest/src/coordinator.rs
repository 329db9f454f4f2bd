//! Ingestion coordinator.
//!
//! One ingestion hashes the payload, then runs the metadata insert and the
//! blob publish concurrently under a shared [`TaskScope`]. Neither unit holds a
//! lock across the other's I/O: the row commits on its own and the blob is
//! published provisionally. The ingestion succeeds only if both units did and
//! the scope is still live; otherwise the row is deleted again and a blob this
//! call published is removed before the failure is returned.

use crate::blob::BlobStore;
use crate::error::{BlobError, IngestError, IngestResult, PersistenceCause};
use crate::hasher::ContentHasher;
use crate::tasks::{TaskScope, UnitError, UnitResult};
use docshell_config::IngestConfig;
use docshell_core::{
    CancelCause, CancelScope, DocumentCreationRequest, DocumentId, DocumentRecord, NewDocument,
    UserId,
};
use docshell_db::{Database, DbError, DbResult};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const METADATA_UNIT: &str = "metadata";
const BLOB_UNIT: &str = "blob";

/// Limits applied to every ingestion.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Deadline for one ingestion, measured from the call. `None` means unbounded.
    pub timeout: Option<Duration>,
    pub max_upload_bytes: u64,
}

impl IngestOptions {
    pub fn from_ingest_config(config: &IngestConfig) -> Self {
        Self {
            timeout: Some(config.timeout()),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_ingest_config(&IngestConfig::default())
    }
}

/// Coordinates hashing and the two writes of a document ingestion.
///
/// Holds no per-ingestion state; concurrent calls are independent and only
/// meet at the metadata uniqueness constraint and the filesystem.
#[derive(Clone)]
pub struct IngestionCoordinator {
    db: Database,
    blobs: BlobStore,
    hasher: ContentHasher,
    options: IngestOptions,
}

impl IngestionCoordinator {
    pub fn new(db: Database, blobs: BlobStore, options: IngestOptions) -> Self {
        Self {
            db,
            blobs,
            hasher: ContentHasher::new(),
            options,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Ingest a request under the configured timeout.
    pub async fn ingest(&self, request: DocumentCreationRequest) -> IngestResult<DocumentRecord> {
        let deadline = self
            .options
            .timeout
            .and_then(|t| Instant::now().checked_add(t));
        self.ingest_with_deadline(request, deadline).await
    }

    /// Ingest a request bounded by the caller's own deadline.
    pub async fn ingest_with_deadline(
        &self,
        request: DocumentCreationRequest,
        deadline: Option<Instant>,
    ) -> IngestResult<DocumentRecord> {
        let target = self.validate(&request)?;

        let hasher = self.hasher;
        let (request, hash) = tokio::task::spawn_blocking(move || {
            let hash = hasher.hash_reader(&request.payload[..]);
            (request, hash)
        })
        .await
        .map_err(|e| IngestError::HashingFailed(io::Error::other(e.to_string())))?;
        let hash = hash.map_err(IngestError::HashingFailed)?;

        self.dispatch(request, target, hash, deadline).await
    }

    /// Drain a reader, hashing it as it is read, and ingest the bytes.
    ///
    /// Failing to read is reported as `HashingFailed`. At most one byte past
    /// the upload limit is read before the request is rejected.
    pub async fn ingest_reader<R>(
        &self,
        reader: R,
        author_id: UserId,
        uploader_id: UserId,
        target_path: &str,
        filename: &str,
    ) -> IngestResult<DocumentRecord>
    where
        R: Read + Send + 'static,
    {
        let deadline = self
            .options
            .timeout
            .and_then(|t| Instant::now().checked_add(t));

        let hasher = self.hasher;
        let limit = self.options.max_upload_bytes;
        let (payload, hash) = tokio::task::spawn_blocking(move || {
            hasher.read_and_hash(reader.take(limit.saturating_add(1)))
        })
        .await
        .map_err(|e| IngestError::HashingFailed(io::Error::other(e.to_string())))?
        .map_err(IngestError::HashingFailed)?;

        let request =
            DocumentCreationRequest::new(author_id, uploader_id, target_path, filename, payload);
        let target = self.validate(&request)?;

        self.dispatch(request, target, hash, deadline).await
    }

    /// Ingest a file from disk under its own file name.
    pub async fn ingest_file(
        &self,
        path: &Path,
        author_id: UserId,
        uploader_id: UserId,
        target_path: &str,
    ) -> IngestResult<DocumentRecord> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                IngestError::InvalidRequest(format!("No usable file name: {}", path.display()))
            })?;

        let file = File::open(path).map_err(IngestError::HashingFailed)?;
        let len = file.metadata().map_err(IngestError::HashingFailed)?.len();
        if len > self.options.max_upload_bytes {
            return Err(too_large(len, self.options.max_upload_bytes));
        }

        self.ingest_reader(file, author_id, uploader_id, target_path, filename)
            .await
    }

    /// All documents, ordered by id.
    pub fn list_all(&self) -> DbResult<Vec<DocumentRecord>> {
        self.db.find_all_documents()
    }

    pub fn find_by_id(&self, id: DocumentId) -> DbResult<Option<DocumentRecord>> {
        self.db.find_document_by_id(id)
    }

    /// Open a stored blob read-only by its volume-relative path.
    pub fn download(&self, rel_path: &str) -> Result<File, BlobError> {
        self.blobs.open(rel_path)
    }

    /// Check that the blob behind a record has the recorded size and digest.
    pub fn verify(&self, record: &DocumentRecord) -> Result<bool, BlobError> {
        let location = record.location();
        let file = match self.blobs.open(&location) {
            Ok(file) => file,
            Err(BlobError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let len = file
            .metadata()
            .map_err(|e| BlobError::io(self.blobs.root().join(&location), e))?
            .len();
        if len != record.size as u64 {
            return Ok(false);
        }
        let hash = self
            .hasher
            .hash_reader(file)
            .map_err(|e| BlobError::io(self.blobs.root().join(&location), e))?;
        Ok(hash == record.hash)
    }

    fn validate(&self, request: &DocumentCreationRequest) -> IngestResult<String> {
        let len = request.payload.len() as u64;
        if len > self.options.max_upload_bytes {
            return Err(too_large(len, self.options.max_upload_bytes));
        }
        request
            .validate()
            .map_err(|e| IngestError::InvalidRequest(e.to_string()))
    }

    async fn dispatch(
        &self,
        request: DocumentCreationRequest,
        target: String,
        hash: String,
        deadline: Option<Instant>,
    ) -> IngestResult<DocumentRecord> {
        let doc = NewDocument::from_request(&request, target.clone(), hash.clone());
        info!(
            "Ingesting {} ({} bytes, hash {})",
            doc.location(),
            doc.size,
            &hash[..hash.len().min(12)]
        );

        let mut tasks = TaskScope::new(deadline);

        let db = self.db.clone();
        let metadata = tasks.spawn(METADATA_UNIT, move |scope| {
            db.insert_document_scoped(&doc, &scope)
        });

        let blobs = self.blobs.clone();
        let DocumentCreationRequest {
            payload, filename, ..
        } = request;
        let blob = tasks.spawn(BLOB_UNIT, move |scope| {
            blobs.put(&scope, &target, &payload, &filename)
        });

        let (metadata, blob) = tasks.join2(metadata, blob).await;

        let scope = tasks.scope().clone();
        let db = self.db.clone();
        let blobs = self.blobs.clone();
        tokio::task::spawn_blocking(move || {
            settle_outcome(&db, &blobs, &scope, metadata, blob, hash)
        })
        .await
        .map_err(|e| {
            IngestError::PersistenceFailed(PersistenceCause::Task {
                unit: "arbitration",
                message: e.to_string(),
            })
        })?
    }
}

/// Accept on full success, otherwise undo both writes and classify.
fn settle_outcome(
    db: &Database,
    blobs: &BlobStore,
    scope: &CancelScope,
    metadata: UnitResult<DocumentRecord, DbError>,
    blob: UnitResult<String, BlobError>,
    hash: String,
) -> IngestResult<DocumentRecord> {
    match (metadata, blob) {
        (Ok(record), Ok(location)) if !scope.is_cancelled() => {
            info!("Ingested document {} at {}", record.id, location);
            Ok(record)
        }
        (metadata, blob) => {
            let blob_err = match blob {
                Ok(location) => {
                    discard_blob(blobs, &location);
                    None
                }
                Err(e) => Some(e),
            };
            let metadata_err = match metadata {
                Ok(record) => {
                    if let Err(e) = discard_record(db, &record) {
                        // The row outlives its blob; that fault outranks the cause.
                        let err = IngestError::PersistenceFailed(PersistenceCause::Metadata(e));
                        warn!("Ingestion failed: {}", err);
                        return Err(err);
                    }
                    None
                }
                Err(e) => Some(e),
            };

            let err = classify(db, metadata_err, blob_err, scope, hash);
            warn!("Ingestion failed: {}", err);
            Err(err)
        }
    }
}

/// Pick the one reported failure.
///
/// A unit that only observed the cancellation is not a cause. The first real
/// failure wins, metadata before blob, since the metadata store is the
/// authority on duplicates. An occupied destination is also a duplicate when
/// the store already holds the same digest, since the metadata unit may have
/// been cancelled before it could report the conflict. With no real failure
/// the scope's cause is reported.
fn classify(
    db: &Database,
    metadata: Option<UnitError<DbError>>,
    blob: Option<UnitError<BlobError>>,
    scope: &CancelScope,
    hash: String,
) -> IngestError {
    match metadata {
        Some(UnitError::Failed(DbError::Conflict(_))) => {
            return IngestError::DuplicateContent { hash };
        }
        Some(UnitError::Failed(DbError::Cancelled(_))) | None => {}
        Some(UnitError::Failed(e)) => {
            return IngestError::PersistenceFailed(PersistenceCause::Metadata(e));
        }
        Some(UnitError::Aborted(message)) => {
            return IngestError::PersistenceFailed(PersistenceCause::Task {
                unit: METADATA_UNIT,
                message,
            });
        }
    }

    match blob {
        Some(UnitError::Failed(BlobError::Cancelled(_))) | None => {}
        Some(UnitError::Failed(BlobError::DestinationExists(path))) => {
            if let Ok(Some(existing)) = db.find_document_by_hash(&hash) {
                debug!("Destination taken by document {}", existing.id);
                return IngestError::DuplicateContent { hash };
            }
            return IngestError::PersistenceFailed(PersistenceCause::Blob(
                BlobError::DestinationExists(path),
            ));
        }
        Some(UnitError::Failed(e)) => {
            return IngestError::PersistenceFailed(PersistenceCause::Blob(e));
        }
        Some(UnitError::Aborted(message)) => {
            return IngestError::PersistenceFailed(PersistenceCause::Task {
                unit: BLOB_UNIT,
                message,
            });
        }
    }

    let cause = scope.cause().unwrap_or(CancelCause::DeadlineExceeded);
    IngestError::CancelledOrTimedOut(cause)
}

fn discard_record(db: &Database, record: &DocumentRecord) -> DbResult<()> {
    match db.delete_document(record.id) {
        Ok(()) => {
            debug!("Deleted document {}", record.id);
            Ok(())
        }
        Err(DbError::NotFound(_)) => Ok(()),
        Err(e) => {
            warn!("Failed to delete document {}: {}", record.id, e);
            Err(e)
        }
    }
}

fn discard_blob(blobs: &BlobStore, location: &str) {
    match blobs.remove(location) {
        Ok(true) => debug!("Removed blob {}", location),
        Ok(false) => {}
        Err(e) => warn!("Failed to remove blob {}: {}", location, e),
    }
}

fn too_large(len: u64, limit: u64) -> IngestError {
    IngestError::InvalidRequest(format!(
        "Upload of {} bytes exceeds the limit of {} bytes",
        len, limit
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshell_db::DbOptions;
    use tempfile::{tempdir, TempDir};

    fn coordinator() -> (IngestionCoordinator, TempDir) {
        let volume = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let blobs = BlobStore::new(volume.path()).unwrap();
        let options = IngestOptions {
            timeout: Some(Duration::from_secs(10)),
            max_upload_bytes: 1024 * 1024,
        };
        (IngestionCoordinator::new(db, blobs, options), volume)
    }

    fn request(title: &str, payload: &[u8]) -> DocumentCreationRequest {
        DocumentCreationRequest::new(1, 2, "inbox", title, payload)
    }

    #[tokio::test]
    async fn test_ingest_hello_docs() {
        let (coordinator, _volume) = coordinator();

        let record = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap();

        assert_eq!(record.size, 10);
        assert_eq!(record.title, "note.txt");
        assert_eq!(record.path, "inbox");
        assert_eq!(record.hash, ContentHasher::new().hash_bytes(b"hello docs"));
        assert_eq!(
            coordinator.blobs().read(&record.location()).unwrap(),
            b"hello docs"
        );
        assert!(coordinator.verify(&record).unwrap());
        assert_eq!(coordinator.find_by_id(record.id).unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_duplicate_content_with_different_title() {
        let (coordinator, _volume) = coordinator();

        let first = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap();
        let err = coordinator
            .ingest(request("copy.txt", b"hello docs"))
            .await
            .unwrap_err();

        assert!(err.is_duplicate(), "unexpected error: {}", err);
        let all = coordinator.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].hash, first.hash);
        // The losing upload left no blob behind
        assert!(!coordinator.blobs().exists("inbox/copy.txt"));
        assert!(coordinator.blobs().exists("inbox/note.txt"));
    }

    #[tokio::test]
    async fn test_duplicate_content_same_path_keeps_original_blob() {
        let (coordinator, _volume) = coordinator();

        let first = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap();
        let err = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::DuplicateContent { ref hash } if *hash == first.hash));
        assert!(coordinator.verify(&first).unwrap());
    }

    #[tokio::test]
    async fn test_blob_failure_leaves_no_record() {
        let (coordinator, volume) = coordinator();
        std::fs::write(volume.path().join("blocked"), b"a file, not a dir").unwrap();

        let mut req = request("note.txt", b"hello docs");
        req.target_path = "blocked".to_string();
        let err = coordinator.ingest(req).await.unwrap_err();

        assert!(
            matches!(err, IngestError::PersistenceFailed(PersistenceCause::Blob(_))),
            "unexpected error: {}",
            err
        );
        assert!(coordinator.list_all().unwrap().is_empty());
        // The deleted row freed the hash again
        let record = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap();
        assert!(coordinator.verify(&record).unwrap());
    }

    #[tokio::test]
    async fn test_occupied_destination_with_other_content() {
        let (coordinator, volume) = coordinator();
        std::fs::create_dir_all(volume.path().join("inbox")).unwrap();
        std::fs::write(volume.path().join("inbox").join("note.txt"), b"older bytes").unwrap();

        let err = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::PersistenceFailed(PersistenceCause::Blob(BlobError::DestinationExists(_)))
        ));
        assert!(coordinator.list_all().unwrap().is_empty());
        assert_eq!(
            coordinator.blobs().read("inbox/note.txt").unwrap(),
            b"older bytes"
        );
    }

    #[tokio::test]
    async fn test_elapsed_deadline_is_cancelled() {
        let (coordinator, _volume) = coordinator();

        let err = coordinator
            .ingest_with_deadline(request("note.txt", b"hello docs"), Some(Instant::now()))
            .await
            .unwrap_err();

        assert!(
            matches!(err, IngestError::CancelledOrTimedOut(CancelCause::DeadlineExceeded)),
            "unexpected error: {}",
            err
        );
        assert!(err.is_retryable());
        assert!(coordinator.list_all().unwrap().is_empty());
        assert!(!coordinator.blobs().exists("inbox/note.txt"));
    }

    #[tokio::test]
    async fn test_deadline_while_metadata_waits_on_lock() {
        let volume = tempdir().unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.db");
        let db = Database::open_with_options(
            &path,
            &DbOptions {
                max_connections: 2,
                busy_timeout: Duration::from_secs(2),
            },
        )
        .unwrap();
        let coordinator = IngestionCoordinator::new(
            db,
            BlobStore::new(volume.path()).unwrap(),
            IngestOptions {
                timeout: Some(Duration::from_millis(100)),
                max_upload_bytes: 1024,
            },
        );

        // Another process is mid-write
        let writer = rusqlite::Connection::open(&path).unwrap();
        writer.execute_batch("BEGIN IMMEDIATE").unwrap();

        let started = Instant::now();
        let err = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        writer.execute_batch("ROLLBACK").unwrap();

        assert!(
            matches!(err, IngestError::CancelledOrTimedOut(CancelCause::DeadlineExceeded)),
            "unexpected error: {}",
            err
        );
        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
        assert!(coordinator.find_by_id(1).unwrap().is_none());
        assert!(coordinator.list_all().unwrap().is_empty());
        assert!(!coordinator.blobs().exists("inbox/note.txt"));
    }

    #[tokio::test]
    async fn test_cancel_after_both_writes_undoes_them() {
        let (coordinator, _volume) = coordinator();
        let db = coordinator.database().clone();
        let blobs = coordinator.blobs().clone();
        let hash = ContentHasher::new().hash_bytes(b"hello docs");

        let scope = CancelScope::new();
        let doc = NewDocument::from_request(&request("note.txt", b"hello docs"), "inbox", &hash);
        let record = db.insert_document_scoped(&doc, &scope).unwrap();
        let location = blobs.put(&scope, "inbox", b"hello docs", "note.txt").unwrap();

        // The deadline lands before the outcome is settled
        scope.cancel(CancelCause::DeadlineExceeded);
        let err = settle_outcome(&db, &blobs, &scope, Ok(record.clone()), Ok(location), hash)
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::CancelledOrTimedOut(CancelCause::DeadlineExceeded)
        ));
        assert!(coordinator.find_by_id(record.id).unwrap().is_none());
        assert!(!coordinator.blobs().exists("inbox/note.txt"));
    }

    #[tokio::test]
    async fn test_find_unknown_id() {
        let (coordinator, _volume) = coordinator();
        assert!(coordinator.find_by_id(9999).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected_before_dispatch() {
        let (coordinator, _volume) = coordinator();

        let err = coordinator
            .ingest(request("../escape.txt", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidRequest(_)));

        let mut req = request("ok.txt", b"x");
        req.target_path = "../outside".to_string();
        assert!(matches!(
            coordinator.ingest(req).await,
            Err(IngestError::InvalidRequest(_))
        ));

        let big = vec![0u8; 1024 * 1024 + 1];
        assert!(matches!(
            coordinator.ingest(request("big.bin", &big)).await,
            Err(IngestError::InvalidRequest(_))
        ));

        assert!(coordinator.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_file_and_download() {
        let (coordinator, _volume) = coordinator();
        let source = tempdir().unwrap();
        let path = source.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4 fake").unwrap();

        let record = coordinator
            .ingest_file(&path, 3, 4, "reports/2024")
            .await
            .unwrap();

        assert_eq!(record.title, "report.pdf");
        assert_eq!(record.author_id, 3);
        assert_eq!(record.uploader_id, 4);
        assert_eq!(record.location(), "reports/2024/report.pdf");

        let mut contents = Vec::new();
        coordinator
            .download(&record.location())
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"%PDF-1.4 fake");
    }

    #[tokio::test]
    async fn test_ingest_missing_file_is_hashing_failure() {
        let (coordinator, _volume) = coordinator();
        let source = tempdir().unwrap();

        let err = coordinator
            .ingest_file(&source.path().join("absent.txt"), 1, 1, "")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::HashingFailed(_)));
    }

    struct BrokenStream;

    impl Read for BrokenStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away"))
        }
    }

    #[tokio::test]
    async fn test_ingest_reader() {
        let (coordinator, _volume) = coordinator();

        let record = coordinator
            .ingest_reader(io::Cursor::new(b"streamed".to_vec()), 1, 1, "in", "s.txt")
            .await
            .unwrap();
        assert_eq!(record.size, 8);
        assert_eq!(record.location(), "in/s.txt");

        let err = coordinator
            .ingest_reader(BrokenStream, 1, 1, "in", "broken.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::HashingFailed(_)));

        let oversized = io::repeat(b'x');
        let err = coordinator
            .ingest_reader(oversized, 1, 1, "in", "endless.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidRequest(_)));
        assert_eq!(coordinator.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let (coordinator, volume) = coordinator();
        let record = coordinator
            .ingest(request("note.txt", b"hello docs"))
            .await
            .unwrap();

        std::fs::write(volume.path().join("inbox").join("note.txt"), b"hello DOCS").unwrap();
        assert!(!coordinator.verify(&record).unwrap());

        coordinator.blobs().remove(&record.location()).unwrap();
        assert!(!coordinator.verify(&record).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_uploads_yield_one_record() {
        let volume = tempdir().unwrap();
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("docs.db")).unwrap();
        let blobs = BlobStore::new(volume.path()).unwrap();
        let coordinator = IngestionCoordinator::new(
            db,
            blobs,
            IngestOptions {
                timeout: Some(Duration::from_secs(30)),
                max_upload_bytes: 1024,
            },
        );

        let mut handles = Vec::new();
        for i in 0..4 {
            let c = coordinator.clone();
            handles.push(tokio::spawn(async move {
                c.ingest(request(&format!("copy-{}.txt", i), b"same bytes"))
                    .await
            }));
        }

        let mut ok = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) if e.is_duplicate() => duplicates += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(duplicates, 3);
        let all = coordinator.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(coordinator.verify(&all[0]).unwrap());
        // Only the winner's blob remains
        let files = std::fs::read_dir(volume.path().join("inbox")).unwrap().count();
        assert_eq!(files, 1);
    }
}
