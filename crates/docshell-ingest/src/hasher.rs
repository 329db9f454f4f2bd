//! Content digests.

use sha2::{Digest, Sha512};
use std::io::{self, Read};

/// Length of a hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 128;

/// Computes the SHA-512 digest of document bytes as lowercase hex.
///
/// The digest is both the integrity check for stored blobs and the key the
/// metadata store's uniqueness constraint uses to detect duplicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    /// Digest of an in-memory payload.
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        hex::encode(Sha512::digest(bytes))
    }

    /// Digest of everything a reader yields. I/O errors are propagated.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<String> {
        let mut hasher = Sha512::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Drain a reader into memory while hashing it.
    pub fn read_and_hash<R: Read>(&self, mut reader: R) -> io::Result<(Vec<u8>, String)> {
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        let hash = self.hash_bytes(&payload);
        Ok((payload, hash))
    }
}
