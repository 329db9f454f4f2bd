//! Initialize Docshell.

use super::{open_database, Session};
use anyhow::{Context, Result};
use colored::Colorize;
use docshell_config::Config;
use docshell_ingest::BlobStore;

pub fn run(session: &Session) -> Result<()> {
    // Check if already initialized
    if session.is_initialized() {
        println!(
            "{} Docshell is already initialized.",
            "Note:".yellow().bold()
        );
        println!("  Config: {}", session.config_file.display());
        println!("  Database: {}", session.database_path().display());
        println!("  Volume: {}", session.volume_dir().display());
        return Ok(());
    }

    println!("{}", "Initializing Docshell...".cyan().bold());

    session
        .paths
        .ensure_dirs()
        .context("Failed to create directories")?;
    println!("  {} Created directories", "✓".green());

    Config::create_default_file(&session.config_file).context("Failed to create config file")?;
    println!(
        "  {} Created config: {}",
        "✓".green(),
        session.config_file.display()
    );

    let db_path = session.database_path();
    let _db = open_database(&session.config, &db_path).context("Failed to initialize database")?;
    println!("  {} Created database: {}", "✓".green(), db_path.display());

    let volume = BlobStore::new(session.volume_dir()).context("Failed to create volume")?;
    println!("  {} Created volume: {}", "✓".green(), volume.root().display());

    println!();
    println!("{}", "Docshell initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  1. Ingest a document: {}",
        "docshell ingest ./report.pdf --author 1".cyan()
    );
    println!("  2. List documents: {}", "docshell list".cyan());

    Ok(())
}
