//! List command - list stored documents.

use super::{format_size, Session};
use anyhow::Result;
use colored::Colorize;
use docshell_core::DocumentRecord;
use docshell_db::Database;

pub fn run(
    session: &Session,
    author: Option<i64>,
    uploader: Option<i64>,
    json: bool,
) -> Result<()> {
    let db = session.database()?;
    run_with_db(&db, author, uploader, json, &session.config.ui.date_format)
}

/// Run list with an existing database connection.
pub fn run_with_db(
    db: &Database,
    author: Option<i64>,
    uploader: Option<i64>,
    json: bool,
    date_format: &str,
) -> Result<()> {
    let documents = select(db, author, uploader)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
        return Ok(());
    }

    if documents.is_empty() {
        println!(
            "{}",
            "No documents found. Use 'docshell ingest <path>' to add one.".dimmed()
        );
        return Ok(());
    }

    println!("{}", "Documents".cyan().bold());
    println!("{}", "─".repeat(70));

    for doc in &documents {
        println!(
            "{} {} {} {}",
            format!("#{}", doc.id).white().bold(),
            doc.location(),
            format!("[{}]", format_size(doc.size)).dimmed(),
            doc.created_at.format(date_format).to_string().dimmed()
        );
        println!(
            "  {}",
            format!(
                "author {} · uploader {} · {}",
                doc.author_id,
                doc.uploader_id,
                doc.short_hash()
            )
            .dimmed()
        );
    }

    println!();
    println!("{} documents", documents.len());

    Ok(())
}

fn select(
    db: &Database,
    author: Option<i64>,
    uploader: Option<i64>,
) -> Result<Vec<DocumentRecord>> {
    let documents = match (author, uploader) {
        (Some(author), _) => db.find_documents_by_author(author)?,
        (None, Some(uploader)) => db.find_documents_by_uploader(uploader)?,
        (None, None) => db.find_all_documents()?,
    };
    Ok(documents)
}
