//! Configuration commands.

use super::Session;
use anyhow::{Context, Result};
use colored::Colorize;

/// Print the effective configuration, including defaults not in the file.
pub fn show(session: &Session) -> Result<()> {
    let rendered = session
        .config
        .to_toml_string()
        .context("Failed to render config")?;

    println!("{}", "Current Configuration".cyan().bold());
    println!("{}", "─".repeat(50));
    if !session.config_file.exists() {
        println!(
            "{}",
            format!(
                "# {} not found, showing defaults",
                session.config_file.display()
            )
            .dimmed()
        );
    }
    println!("{}", rendered);
    println!("{}", "─".repeat(50));
    println!("  Database: {}", session.database_path().display());
    println!("  Volume: {}", session.volume_dir().display());

    Ok(())
}

pub fn path(session: &Session) -> Result<()> {
    println!("{}", session.config_file.display());
    Ok(())
}
