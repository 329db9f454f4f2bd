//! Ingest command implementation.

use super::{format_size, Session};
use anyhow::{Context, Result};
use colored::Colorize;
use docshell_ingest::{IngestError, IngestionCoordinator};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ingest a single file or every file under a directory.
pub fn run(
    session: &Session,
    path: &Path,
    author_id: i64,
    uploader_id: i64,
    target: &str,
    timeout_secs: Option<u64>,
) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Path does not exist: {}", path.display());
    }

    let coordinator = session.coordinator(timeout_secs.map(Duration::from_secs))?;
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    if path.is_file() {
        ingest_one(&rt, &coordinator, path, author_id, uploader_id, target)
    } else {
        ingest_dir(&rt, &coordinator, path, author_id, uploader_id, target)
    }
}

fn ingest_one(
    rt: &tokio::runtime::Runtime,
    coordinator: &IngestionCoordinator,
    path: &Path,
    author_id: i64,
    uploader_id: i64,
    target: &str,
) -> Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Ingesting {}", path.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = rt.block_on(coordinator.ingest_file(path, author_id, uploader_id, target));
    pb.finish_and_clear();

    match result {
        Ok(record) => {
            println!(
                "{} {} ({})",
                "Ingested:".green().bold(),
                record.location(),
                format_size(record.size)
            );
            println!("  ID: {}", record.id);
            println!("  Hash: {}", record.short_hash());
            Ok(())
        }
        Err(IngestError::DuplicateContent { hash }) => {
            let existing = coordinator.database().find_document_by_hash(&hash)?;
            println!(
                "{} {} (same content already stored{})",
                "Skipped:".yellow().bold(),
                path.display(),
                existing
                    .map(|d| format!(" as #{} {}", d.id, d.location()))
                    .unwrap_or_default()
            );
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to ingest {}", path.display())),
    }
}

fn ingest_dir(
    rt: &tokio::runtime::Runtime,
    coordinator: &IngestionCoordinator,
    dir: &Path,
    author_id: i64,
    uploader_id: i64,
    target: &str,
) -> Result<()> {
    println!("{} {}", "Scanning:".cyan(), dir.display());

    let files = collect_files(dir);
    if files.is_empty() {
        println!("{}", "No files found.".yellow());
        return Ok(());
    }

    println!("Found {} files", files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut success = 0;
    let mut skipped = 0;
    let mut failures = Vec::new();

    for file in &files {
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        pb.set_message(filename.to_string());

        let target_dir = nested_target(target, dir, file);
        match rt.block_on(coordinator.ingest_file(file, author_id, uploader_id, &target_dir)) {
            Ok(_) => success += 1,
            Err(e) if e.is_duplicate() => skipped += 1,
            Err(e) => failures.push((file.clone(), e)),
        }

        pb.inc(1);
    }

    pb.finish_and_clear();

    println!("\n{} {} files", "Ingested:".green().bold(), success);
    if skipped > 0 {
        println!(
            "{} {} files (content already stored)",
            "Skipped:".yellow().bold(),
            skipped
        );
    }
    if !failures.is_empty() {
        println!("{} {} files", "Failed:".red().bold(), failures.len());
        for (file, e) in &failures {
            println!("  {} {}", file.display(), e.to_string().dimmed());
        }
        anyhow::bail!(
            "{} of {} files failed to ingest",
            failures.len(),
            files.len()
        );
    }

    Ok(())
}

/// Regular, non-hidden files under `dir`, in a stable order.
fn collect_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// Mirror a file's sub-directory under the target directory.
fn nested_target(target: &str, root: &Path, file: &Path) -> String {
    let relative_dir = file
        .parent()
        .and_then(|p| p.strip_prefix(root).ok())
        .map(|p| {
            p.components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();

    match (target.trim_matches('/'), relative_dir.as_str()) {
        (t, "") => t.to_string(),
        ("", r) => r.to_string(),
        (t, r) => format!("{}/{}", t, r),
    }
}
