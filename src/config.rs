//! Configuration module for the backup vault.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{Result, VaultError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/vault.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Backup storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Media root; everything the vault writes lives below it.
    #[serde(default = "default_media_root")]
    pub media_root: String,
    /// Directory under the media root holding finalized backups.
    #[serde(default = "default_backups_dir")]
    pub backups_dir: String,
    /// Directory under the media root holding chunk scratch files.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    /// Extension every finalized upload must carry (without the dot).
    #[serde(default = "default_allowed_extension")]
    pub allowed_extension: String,
    /// Path segment separating the client's own prefix from the subpath.
    #[serde(default = "default_path_marker")]
    pub path_marker: String,
    /// `save_dir` value that maps to a literal folder of the same name.
    #[serde(default = "default_manual_uploads_label")]
    pub manual_uploads_label: String,
    /// Age in seconds after which abandoned chunk files are swept.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Interval in seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_media_root() -> String {
    "data/media".to_string()
}

fn default_backups_dir() -> String {
    "backups".to_string()
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_allowed_extension() -> String {
    "zip".to_string()
}

fn default_path_marker() -> String {
    "files".to_string()
}

fn default_manual_uploads_label() -> String {
    "Manual Uploads".to_string()
}

fn default_session_ttl() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval() -> u64 {
    3600 // 1 hour
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            backups_dir: default_backups_dir(),
            uploads_dir: default_uploads_dir(),
            allowed_extension: default_allowed_extension(),
            path_marker: default_path_marker(),
            manual_uploads_label: default_manual_uploads_label(),
            session_ttl_secs: default_session_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StorageConfig {
    /// Root of all finalized backups (`<media_root>/<backups_dir>`).
    pub fn backups_root(&self) -> PathBuf {
        Path::new(&self.media_root).join(&self.backups_dir)
    }

    /// Scratch directory for chunk files (`<media_root>/<uploads_dir>`).
    pub fn uploads_root(&self) -> PathBuf {
        Path::new(&self.media_root).join(&self.uploads_dir)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/vault.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Web API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Host address to bind.
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Port number for the API.
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// CORS allowed origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// JWT secret used to verify bearer tokens.
    #[serde(default)]
    pub jwt_secret: String,
    /// Largest accepted chunk request body in megabytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size_mb: u64,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8080
}

fn default_max_chunk_size() -> u64 {
    64
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            cors_origins: vec![],
            jwt_secret: String::new(),
            max_chunk_size_mb: default_max_chunk_size(),
        }
    }
}

/// Upload notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Whether completed uploads trigger notifications.
    #[serde(default = "default_notify_enabled")]
    pub enabled: bool,
    /// Sender address for notifications.
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_notify_enabled() -> bool {
    true
}

fn default_sender() -> String {
    "backups@localhost".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: default_notify_enabled(),
            sender: default_sender(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Backup storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Web API configuration.
    #[serde(default)]
    pub web: WebConfig,
    /// Notification configuration.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(VaultError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| VaultError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `VAULT_JWT_SECRET`: Override the JWT secret key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(jwt_secret) = std::env::var("VAULT_JWT_SECRET") {
            if !jwt_secret.is_empty() {
                self.web.jwt_secret = jwt_secret;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.web.jwt_secret.is_empty() {
            return Err(VaultError::Config(
                "jwt_secret is not set. \
                 Set it in config.toml or via VAULT_JWT_SECRET environment variable."
                    .to_string(),
            ));
        }
        if self.storage.allowed_extension.trim_start_matches('.').is_empty() {
            return Err(VaultError::Config(
                "storage.allowed_extension must not be empty".to_string(),
            ));
        }
        if self.storage.path_marker.is_empty() {
            return Err(VaultError::Config(
                "storage.path_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
