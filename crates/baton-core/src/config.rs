//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/baton/config.toml`
//! 3. Project config: `.baton/config.toml`
//! 4. Environment variables: `BATON_*`
//!
//! # Example Config
//!
//! ```toml
//! state_db = ".baton/state.db"
//!
//! [build]
//! wait_ms = 300000
//! stale_ms = 900000
//!
//! [store]
//! busy_timeout_ms = 5000
//! max_connections = 4
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default back-off handed to agents that lose the fixer election (5 minutes)
pub const DEFAULT_WAIT_MS: u64 = 5 * 60 * 1000;

/// Default lease timeout for a silent fixer (15 minutes)
pub const DEFAULT_STALE_MS: u64 = 15 * 60 * 1000;

const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub state_db: PathBuf,
    pub build: BuildConfig,
    pub store: StoreConfig,
}

/// Timing knobs for the fixer election
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub wait_ms: u64,
    pub stale_ms: u64,
}

/// Connection settings for the shared database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// How long a writer waits on another process's lock before failing
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_db: PathBuf::from(".baton/state.db"),
            build: BuildConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            wait_ms: DEFAULT_WAIT_MS,
            stale_ms: DEFAULT_STALE_MS,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            max_connections: 4,
        }
    }
}

impl BuildConfig {
    #[must_use]
    pub const fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    #[must_use]
    pub const fn stale(&self) -> Duration {
        Duration::from_millis(self.stale_ms)
    }
}

/// Fields a config file may set; anything left out keeps the lower layer's value
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub state_db: Option<PathBuf>,
    pub build: Option<PartialBuildConfig>,
    pub store: Option<PartialStoreConfig>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialBuildConfig {
    pub wait_ms: Option<u64>,
    pub stale_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialStoreConfig {
    pub busy_timeout_ms: Option<u64>,
    pub max_connections: Option<u32>,
}

impl Config {
    /// Overlay the keys a config file actually set
    pub fn merge_partial(&mut self, partial: PartialConfig) {
        if let Some(state_db) = partial.state_db {
            self.state_db = state_db;
        }
        if let Some(build) = partial.build {
            self.build.wait_ms = build.wait_ms.unwrap_or(self.build.wait_ms);
            self.build.stale_ms = build.stale_ms.unwrap_or(self.build.stale_ms);
        }
        if let Some(store) = partial.store {
            self.store.busy_timeout_ms = store.busy_timeout_ms.unwrap_or(self.store.busy_timeout_ms);
            self.store.max_connections = store.max_connections.unwrap_or(self.store.max_connections);
        }
    }

    /// Apply environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a numeric variable does not parse
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("BATON_STATE_DB") {
            self.state_db = PathBuf::from(value);
        }

        if let Ok(value) = std::env::var("BATON_WAIT_MS") {
            self.build.wait_ms = parse_env_number("BATON_WAIT_MS", &value)?;
        }

        if let Ok(value) = std::env::var("BATON_STALE_MS") {
            self.build.stale_ms = parse_env_number("BATON_STALE_MS", &value)?;
        }

        if let Ok(value) = std::env::var("BATON_BUSY_TIMEOUT_MS") {
            self.store.busy_timeout_ms = parse_env_number("BATON_BUSY_TIMEOUT_MS", &value)?;
        }

        Ok(())
    }

    /// Check value constraints
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero stale timeout, zero busy timeout,
    /// zero pool size, or empty database path.
    pub fn validate(&self) -> Result<()> {
        if self.build.stale_ms == 0 {
            return Err(Error::InvalidConfig(
                "build.stale_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.busy_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "store.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.state_db.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("state_db cannot be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("Invalid {name} value '{value}': {e}")))
}

/// Load configuration from all sources
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or contains unknown keys
/// - An environment override does not parse
/// - The merged config fails validation
pub async fn load_config() -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        merge_file_if_present(&mut config, &global_path).await?;
    }

    merge_file_if_present(&mut config, &project_config_path()?).await?;

    config.apply_env_vars()?;
    config.validate()?;

    Ok(config)
}

async fn merge_file_if_present(config: &mut Config, path: &Path) -> Result<()> {
    match load_partial_toml_file(path).await {
        Ok(partial) => {
            tracing::debug!(path = %path.display(), "Loaded config file");
            config.merge_partial(partial);
            Ok(())
        }
        // Config file doesn't exist - skip silently
        Err(Error::IoError(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".baton/config.toml"))
        .map_err(|e| Error::IoError(format!("Failed to get current directory: {e}")))
}

fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "baton")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Load a TOML file into a [`PartialConfig`]
///
/// # Errors
///
/// Returns `IoError` if the file cannot be read, `ValidationError` if it is
/// larger than 1 MiB, and `ParseError` for malformed TOML or unknown keys.
pub async fn load_partial_toml_file(path: &Path) -> Result<PartialConfig> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        Error::IoError(format!(
            "Failed to read config file metadata {}: {e}",
            path.display()
        ))
    })?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(Error::ValidationError(format!(
            "Config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::IoError(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::ParseError(format!("Failed to parse config: {}: {e}", path.display())))
}
