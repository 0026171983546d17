//! Configuration for Rewind.
//!
//! Configuration is read from a single TOML file, found in this order:
//! 1. An explicit path (the CLI's `--config`)
//! 2. Local config (`./.rewind.toml`)
//! 3. Global config (`~/.rewind/config.toml`)
//! 4. Defaults
//!
//! Environment variables (`NEON_API_KEY`, `REWIND_API_BASE_URL`,
//! `REWIND_DB_PATH`) override values from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::steps::DemoScript;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Control-plane connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// API base URL. The client default is used when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key. Usually supplied through `NEON_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Operation settlement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Delay between status polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-operation timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Abort as soon as an operation reports `failed`.
    #[serde(default)]
    pub fail_fast_on_failed: bool,
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_timeout_secs() -> u64 {
    300
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
            fail_fast_on_failed: false,
        }
    }
}

impl SettlementConfig {
    /// Poll interval as a `Duration`.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout as a `Duration`.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Metadata store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the SQLite database file.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "rewind.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

/// Project naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Prefix of provisioned project names; the owner id is appended.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

fn default_name_prefix() -> String {
    "snapshot-agent-use-case-demo".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { name_prefix: default_name_prefix() }
    }
}

impl ProjectConfig {
    /// Name of the project provisioned for `owner_id`.
    pub fn project_name(&self, owner_id: &str) -> String {
        format!("{}-{}", self.name_prefix, owner_id)
    }
}

/// Restore-target branch selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Branch names to restore onto, most preferred first.
    #[serde(default = "default_preferred_branches")]
    pub preferred: Vec<String>,
}

fn default_preferred_branches() -> Vec<String> {
    vec!["main".to_string(), "production".to_string()]
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self { preferred: default_preferred_branches() }
    }
}

/// Root configuration for Rewind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Control-plane settings.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    /// Settlement settings.
    #[serde(default)]
    pub settlement: SettlementConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Project naming.
    #[serde(default)]
    pub project: ProjectConfig,
    /// Branch selection.
    #[serde(default)]
    pub branches: BranchConfig,
    /// Custom step script. The contact-book script is used when unset.
    #[serde(default)]
    pub script: Option<DemoScript>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".rewind")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".rewind.toml")
    }

    /// Discover and load configuration, then apply environment overrides.
    ///
    /// An explicit path must exist; the local and global files are optional.
    pub fn discover_and_load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_first_existing(&[Self::default_local_path(), Self::default_global_path()])?,
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_first_existing(candidates: &[PathBuf]) -> ConfigResult<Self> {
        for path in candidates {
            if path.exists() {
                return Self::load_from_file(path);
            }
        }
        Ok(Self::default())
    }

    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(api_key) = non_empty("NEON_API_KEY") {
            self.control_plane.api_key = Some(api_key);
        }
        if let Some(base_url) = non_empty("REWIND_API_BASE_URL") {
            self.control_plane.base_url = Some(base_url);
        }
        if let Some(path) = non_empty("REWIND_DB_PATH") {
            self.storage.path = path;
        }
    }

    /// Checks values that would only fail later at first use.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.settlement.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("settlement.poll_interval_ms must be > 0".to_string()));
        }
        if self.settlement.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("settlement.timeout_secs must be > 0".to_string()));
        }
        if self.branches.preferred.is_empty() {
            return Err(ConfigError::InvalidValue("branches.preferred cannot be empty".to_string()));
        }
        if self.project.name_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue("project.name_prefix cannot be empty".to_string()));
        }
        if let Some(script) = &self.script {
            script.validate()?;
        }
        Ok(())
    }

    /// The step script in effect.
    pub fn script(&self) -> DemoScript {
        self.script.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.settlement.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.settlement.timeout(), Duration::from_secs(300));
        assert!(!config.settlement.fail_fast_on_failed);
        assert_eq!(config.storage.path, "rewind.db");
        assert_eq!(config.branches.preferred, vec!["main", "production"]);
        assert_eq!(config.project.project_name("u1"), "snapshot-agent-use-case-demo-u1");
        assert_eq!(config.script().len(), 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config_content = r#"
[control_plane]
base_url = "http://localhost:4010"

[settlement]
poll_interval_ms = 250
fail_fast_on_failed = true

[storage]
path = "/tmp/rewind-test.db"

[branches]
preferred = ["production"]
"#;
        std::fs::write(&config_path, config_content).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.control_plane.base_url.as_deref(), Some("http://localhost:4010"));
        assert_eq!(config.control_plane.api_key, None);
        assert_eq!(config.settlement.poll_interval_ms, 250);
        assert_eq!(config.settlement.timeout_secs, 300);
        assert!(config.settlement.fail_fast_on_failed);
        assert_eq!(config.storage.path, "/tmp/rewind-test.db");
        assert_eq!(config.branches.preferred, vec!["production"]);
        assert_eq!(config.project, ProjectConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load_from_file(Path::new("/nonexistent/rewind.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "settlement = [").unwrap();
        assert!(matches!(Config::load_from_file(&config_path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_first_existing_prefers_earlier() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("local.toml");
        let global = temp_dir.path().join("global.toml");
        std::fs::write(&local, "[storage]\npath = \"local.db\"\n").unwrap();
        std::fs::write(&global, "[storage]\npath = \"global.db\"\n").unwrap();

        let config = Config::load_first_existing(&[local, global.clone()]).unwrap();
        assert_eq!(config.storage.path, "local.db");

        let config = Config::load_first_existing(&[temp_dir.path().join("absent.toml"), global])
            .unwrap();
        assert_eq!(config.storage.path, "global.db");

        let config = Config::load_first_existing(&[]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NEON_API_KEY", "secret"),
            ("REWIND_API_BASE_URL", "http://proxy"),
            ("REWIND_DB_PATH", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.control_plane.api_key.as_deref(), Some("secret"));
        assert_eq!(config.control_plane.base_url.as_deref(), Some("http://proxy"));
        // Blank values are ignored.
        assert_eq!(config.storage.path, "rewind.db");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.settlement.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.branches.preferred.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.script = Some(DemoScript { steps: vec![] });
        assert!(config.validate().is_err());
    }
}
