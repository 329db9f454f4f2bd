//! Configuration structures and loading.

use crate::error::{ConfigError, ConfigResult};
use crate::paths::AppPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub ui: UiConfig,
}

impl Config {
    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let contents = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create a default config file with comments.
    pub fn create_default_file(path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default_config_string())?;
        Ok(())
    }

    /// Generate a default config file with helpful comments.
    pub fn default_config_string() -> String {
        r#"# Docshell Configuration

[storage]
# Root directory for stored documents (the volume).
# Every document path is resolved relative to it.
# volume_dir = "~/.local/share/docshell/volume"

[database]
# SQLite metadata database
# path = "~/.local/share/docshell/docshell.db"
max_connections = 10
busy_timeout_ms = 5000

[ingest]
# Deadline for a single ingestion (hash, metadata insert and blob publish)
timeout_seconds = 5

# Uploads larger than this are rejected before hashing
max_upload_bytes = 33554432

[ui]
# Enable colored output
color = true

# Date format (strftime)
date_format = "%Y-%m-%d %H:%M"
"#
        .to_string()
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ingest.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "ingest.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.ingest.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "ingest.max_upload_bytes must be greater than 0".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Volume directory, falling back to the platform data dir.
    pub fn volume_dir(&self, paths: &AppPaths) -> PathBuf {
        self.storage
            .volume_dir
            .as_ref()
            .map(|p| expand_home(p))
            .unwrap_or_else(|| paths.volume_dir.clone())
    }

    /// Database file, falling back to the platform data dir.
    pub fn database_path(&self, paths: &AppPaths) -> PathBuf {
        self.database
            .path
            .as_ref()
            .map(|p| expand_home(p))
            .unwrap_or_else(|| paths.database_file.clone())
    }
}

/// Document volume settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub volume_dir: Option<String>,
}

/// Metadata database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<String>,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 10,
            busy_timeout_ms: 5000,
        }
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub timeout_seconds: u64,
    pub max_upload_bytes: u64,
}

impl IngestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// UI/Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub color: bool,
    pub date_format: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            color: true,
            date_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
