//! Show command - display document details.

use super::{format_size, Session};
use anyhow::Result;
use colored::Colorize;
use docshell_ingest::IngestionCoordinator;

pub fn run(session: &Session, id: i64) -> Result<()> {
    let coordinator = session.coordinator(None)?;
    run_with_coordinator(&coordinator, id, &session.config.ui.date_format)
}

/// Run show with an existing coordinator.
pub fn run_with_coordinator(
    coordinator: &IngestionCoordinator,
    id: i64,
    date_format: &str,
) -> Result<()> {
    let doc = coordinator
        .find_by_id(id)?
        .ok_or_else(|| anyhow::anyhow!("Document not found: {}", id))?;

    println!("📄 {}", doc.title.white().bold());
    println!("{}", "─".repeat(70));

    println!("  {}: {}", "ID".cyan(), doc.id);
    println!("  {}: {}", "Location".cyan(), doc.location());
    println!("  {}: {}", "Size".cyan(), format_size(doc.size));
    println!("  {}: {}", "Author".cyan(), doc.author_id);
    println!("  {}: {}", "Uploader".cyan(), doc.uploader_id);
    println!("  {}: {}", "Created".cyan(), doc.created_at.format(date_format));
    println!("  {}: {}", "Changed".cyan(), doc.changed_at.format(date_format));
    println!("  {}: {}", "Hash".cyan(), doc.hash);

    let status = match coordinator.verify(&doc) {
        Ok(true) => "verified".green().to_string(),
        Ok(false) => "MISMATCH or missing".red().bold().to_string(),
        Err(e) => format!("{} ({})", "unreadable".red(), e),
    };
    println!("  {}: {}", "Blob".cyan(), status);

    Ok(())
}
