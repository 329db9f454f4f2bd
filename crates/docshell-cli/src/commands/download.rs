//! Download command - stream a stored document out of the volume.

use super::Session;
use anyhow::{Context, Result};
use colored::Colorize;
use docshell_ingest::IngestionCoordinator;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

pub fn run(session: &Session, rel_path: &str, output: Option<&Path>) -> Result<()> {
    let coordinator = session.coordinator(None)?;
    run_with_coordinator(&coordinator, rel_path, output)
}

/// Run download with an existing coordinator.
pub fn run_with_coordinator(
    coordinator: &IngestionCoordinator,
    rel_path: &str,
    output: Option<&Path>,
) -> Result<()> {
    let mut blob = coordinator
        .download(rel_path)
        .with_context(|| format!("Failed to open {}", rel_path))?;

    match output {
        Some(out) => {
            // Refuse to clobber an existing local file
            let mut file = File::options()
                .write(true)
                .create_new(true)
                .open(out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
            let bytes = io::copy(&mut blob, &mut file).context("Failed to copy document")?;
            file.sync_all().context("Failed to flush output")?;
            eprintln!(
                "{} {} → {} ({} bytes)",
                "Downloaded:".green().bold(),
                rel_path,
                out.display(),
                bytes
            );
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            io::copy(&mut blob, &mut lock).context("Failed to write document")?;
            lock.flush()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshell_db::Database;
    use docshell_ingest::{BlobStore, IngestOptions};
    use tempfile::tempdir;

    fn coordinator(volume: &Path) -> IngestionCoordinator {
        IngestionCoordinator::new(
            Database::open_in_memory().unwrap(),
            BlobStore::new(volume).unwrap(),
            IngestOptions::default(),
        )
    }

    #[test]
    fn test_download_to_file() {
        let volume = tempdir().unwrap();
        std::fs::create_dir_all(volume.path().join("inbox")).unwrap();
        std::fs::write(volume.path().join("inbox").join("a.txt"), b"payload").unwrap();
        let out_dir = tempdir().unwrap();
        let out = out_dir.path().join("copy.txt");

        run_with_coordinator(&coordinator(volume.path()), "inbox/a.txt", Some(&out)).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"payload");

        // Existing output is never overwritten
        assert!(
            run_with_coordinator(&coordinator(volume.path()), "inbox/a.txt", Some(&out)).is_err()
        );
    }

    #[test]
    fn test_download_missing_or_escaping() {
        let volume = tempdir().unwrap();
        let c = coordinator(volume.path());
        assert!(run_with_coordinator(&c, "inbox/none.txt", None).is_err());
        assert!(run_with_coordinator(&c, "../etc/passwd", None).is_err());
    }
}
