//! Configuration module for the content indexer.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary after loading)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CINDEX_` and use double underscores
//! to separate nested levels:
//! - `CINDEX_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `CINDEX_INDEXING__MEMORY_BUDGET_BYTES=1048576` sets `indexing.memory_budget_bytes`
//! - `CINDEX_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding the settings file, searched from the current directory upwards.
pub const CONFIG_DIR: &str = ".cindex";

const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "CINDEX_";

const MIB: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration file already exists at {}. Use --force to overwrite", .0.display())]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .cindex is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Scheduler and content loading configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Number of worker threads shared by all indexing jobs
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Soft ceiling on bytes of file content held in memory at once
    #[serde(default = "default_memory_budget_bytes")]
    pub memory_budget_bytes: u64,

    /// Files larger than this are reported as too large and never loaded
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// How often blocked callers re-check cancellation
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between fairness passes when no job has a file ready
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Patterns to ignore during file discovery
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

/// Logging configuration.
///
/// `default` applies to every target; `modules` overrides single targets,
/// e.g. `scheduler = "debug"`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,

    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_memory_budget_bytes() -> u64 {
    20 * MIB
}
fn default_max_file_size_bytes() -> u64 {
    20 * MIB
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_idle_backoff_ms() -> u64 {
    5
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        "target/**".to_string(),
        "node_modules/**".to_string(),
        ".git/**".to_string(),
        ".cindex/**".to_string(),
    ]
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            indexing: IndexingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            memory_budget_bytes: default_memory_budget_bytes(),
            max_file_size_bytes: default_max_file_size_bytes(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, ConfigError> {
        // Try to find the workspace root by looking for .cindex directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore stays in field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
    }

    /// Find the settings file by looking for a .cindex directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .cindex is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file under `root`
    pub fn init_config_file(root: &Path, force: bool) -> Result<PathBuf, ConfigError> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(ConfigError::AlreadyExists(config_path));
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert!(settings.indexing.parallel_threads >= 1);
        assert_eq!(settings.indexing.memory_budget_bytes, 20 * MIB);
        assert_eq!(settings.indexing.poll_interval_ms, 100);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
[indexing]
parallel_threads = 3
memory_budget_bytes = 4096

[logging]
default = "info"

[logging.modules]
scheduler = "trace"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.indexing.parallel_threads, 3);
        assert_eq!(settings.indexing.memory_budget_bytes, 4096);
        // Unset values fall back to defaults
        assert_eq!(settings.indexing.max_file_size_bytes, 20 * MIB);
        assert_eq!(settings.logging.default, "info");
        assert_eq!(
            settings.logging.modules.get("scheduler").map(String::as_str),
            Some("trace")
        );
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.indexing.parallel_threads = 7;
        settings.save(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.indexing.parallel_threads, 7);
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let temp = TempDir::new().unwrap();

        let path = Settings::init_config_file(temp.path(), false).unwrap();
        assert!(path.exists());

        let again = Settings::init_config_file(temp.path(), false);
        assert!(matches!(again, Err(ConfigError::AlreadyExists(_))));

        assert!(Settings::init_config_file(temp.path(), true).is_ok());
    }
}
