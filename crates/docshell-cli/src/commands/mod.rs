//! CLI command implementations.

pub mod config;
pub mod download;
pub mod ingest;
pub mod init;
pub mod list;
pub mod show;

use anyhow::{Context, Result};
use docshell_config::{AppPaths, Config};
use docshell_db::{Database, DbOptions};
use docshell_ingest::{BlobStore, IngestOptions, IngestionCoordinator};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Paths and configuration every command starts from.
pub struct Session {
    pub paths: AppPaths,
    pub config_file: PathBuf,
    pub config: Config,
}

impl Session {
    /// Resolve paths and load the config, honouring an explicit config file.
    pub fn load(config_override: Option<PathBuf>) -> Result<Self> {
        let paths = AppPaths::new().context("Failed to determine application directories")?;
        let config_file = config_override.unwrap_or_else(|| paths.config_file.clone());
        let config = Config::load_from(&config_file)
            .with_context(|| format!("Failed to load config from {}", config_file.display()))?;

        debug!("Using config {}", config_file.display());

        if !config.ui.color {
            colored::control::set_override(false);
        }

        Ok(Self {
            paths,
            config_file,
            config,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists()
    }

    pub fn database_path(&self) -> PathBuf {
        self.config.database_path(&self.paths)
    }

    pub fn volume_dir(&self) -> PathBuf {
        self.config.volume_dir(&self.paths)
    }

    /// Open the metadata store, ensuring docshell is initialized.
    pub fn database(&self) -> Result<Database> {
        if !self.is_initialized() {
            anyhow::bail!("Docshell is not initialized. Run 'docshell init' first.");
        }
        open_database(&self.config, &self.database_path())
    }

    /// Build the coordinator over the configured store and volume.
    pub fn coordinator(&self, timeout: Option<Duration>) -> Result<IngestionCoordinator> {
        let db = self.database()?;
        let blobs = BlobStore::new(self.volume_dir()).context("Failed to open volume")?;

        let mut options = IngestOptions::from_ingest_config(&self.config.ingest);
        if let Some(timeout) = timeout {
            options.timeout = Some(timeout);
        }

        Ok(IngestionCoordinator::new(db, blobs, options))
    }
}

/// Open a database with the pool settings from config.
pub fn open_database(config: &Config, path: &std::path::Path) -> Result<Database> {
    let options = DbOptions {
        max_connections: config.database.max_connections,
        busy_timeout: config.database.busy_timeout(),
    };
    Database::open_with_options(path, &options).context("Failed to open database")
}

/// Format a file size in human-readable form.
pub fn format_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
