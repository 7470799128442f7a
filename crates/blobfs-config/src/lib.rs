//! # blobfs-config
//!
//! Configuration management for blobfs.
//!
//! Loads configuration from:
//! 1. `~/.blobfs/config.toml` (global)
//! 2. `.blobfs/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

#[macro_use]
pub mod logging;
pub mod path;
pub mod testing;

use blobfs_store::{DigestAlgorithm, StoreConfig, StoreMode};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use crate::logging::LogLevel;

/// Store root override
pub const ENV_ROOT: &str = "BLOBFS_ROOT";
/// Digest algorithm override
pub const ENV_DIGEST: &str = "BLOBFS_DIGEST";
/// Store mode override
pub const ENV_MODE: &str = "BLOBFS_MODE";

/// Project-local config file, relative to the working directory
pub const PROJECT_CONFIG: &str = ".blobfs/config.toml";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new(Config::load().unwrap_or_else(|e| {
        log_config_warn!("Falling back to default config", error = %e);
        Config::default()
    }))
});

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreSection,
    pub logging: LoggingSection,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Path::new(PROJECT_CONFIG))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the global file (if any) and merge the project file over it.
    ///
    /// Missing files are skipped; environment is not consulted.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                log_config_debug!("Loading global config", path = %global_path.display());
                config = Self::from_file(global_path)?;
            }
        }

        if project.exists() {
            log_config_debug!("Loading project config", path = %project.display());
            let contents = std::fs::read_to_string(project)?;
            let overlay: ConfigOverlay = toml::from_str(&contents)?;
            config.merge(overlay);
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.blobfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".blobfs/config.toml"))
    }

    /// Merge a project overlay: every key it sets replaces ours, keys it
    /// leaves out keep the global value.
    fn merge(&mut self, overlay: ConfigOverlay) {
        let store = overlay.store;
        if let Some(directory) = store.directory {
            self.store.directory = directory;
        }
        if let Some(mode) = store.mode {
            self.store.mode = mode;
        }
        if let Some(digest) = store.digest {
            self.store.digest = digest;
        }
        if let Some(verify) = store.verify_duplicates {
            self.store.verify_duplicates = verify;
        }
        if let Some(secs) = store.income_max_age_secs {
            self.store.income_max_age_secs = secs;
        }
        if let Some(level) = overlay.logging.level {
            self.logging.level = level;
        }
    }

    /// Apply environment variable overrides.
    ///
    /// `lookup` stands in for `std::env::var` so callers can supply their own
    /// environment. Unparsable values are logged and ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT) {
            self.store.directory = PathBuf::from(root);
        }
        if let Some(digest) = lookup(ENV_DIGEST) {
            match digest.parse() {
                Ok(algorithm) => self.store.digest = algorithm,
                Err(e) => log_config_warn!("Ignoring BLOBFS_DIGEST", value = %digest, error = %e),
            }
        }
        if let Some(mode) = lookup(ENV_MODE) {
            match mode.parse() {
                Ok(mode) => self.store.mode = mode,
                Err(e) => log_config_warn!("Ignoring BLOBFS_MODE", value = %mode, error = %e),
            }
        }
    }

    /// Library settings for opening the configured store.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            directory: path::expand_tilde(&self.store.directory),
            mode: self.store.mode,
            digest: self.store.digest,
            verify_duplicates: self.store.verify_duplicates,
            income_max_age: Duration::from_secs(self.store.income_max_age_secs),
        }
    }

    /// Configured log level, `warn` if the value is not recognized.
    pub fn log_level(&self) -> LogLevel {
        self.logging.level.parse().unwrap_or(LogLevel::Warn)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Store root; `data/` and `income/` are created below it
    pub directory: PathBuf,
    /// plain, dedup or refcount
    pub mode: StoreMode,
    /// Digest used as the partition in dedup and refcount modes
    pub digest: DigestAlgorithm,
    /// Compare bytes before treating equal-size content as a duplicate
    pub verify_duplicates: bool,
    /// Staged files older than this are swept when the store opens
    pub income_max_age_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("~/.blobfs/store"),
            mode: StoreMode::RefCounted,
            digest: DigestAlgorithm::Md5,
            verify_duplicates: false,
            income_max_age_secs: blobfs_store::DEFAULT_INCOME_MAX_AGE.as_secs(),
        }
    }
}

/// Project config as written: only the keys present in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverlay {
    store: StoreOverlay,
    logging: LoggingOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoreOverlay {
    directory: Option<PathBuf>,
    mode: Option<StoreMode>,
    digest: Option<DigestAlgorithm>,
    verify_duplicates: Option<bool>,
    income_max_age_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingOverlay {
    level: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.mode, StoreMode::RefCounted);
        assert_eq!(config.store.digest, DigestAlgorithm::Md5);
        assert_eq!(config.store.income_max_age_secs, 86400);
        assert_eq!(config.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[logging]"));
        assert!(toml_str.contains("mode = \"refcount\""));
        assert!(toml_str.contains("digest = \"MD5\""));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.store.mode = StoreMode::Deduplicating;
        config.store.digest = DigestAlgorithm::Sha256;
        let toml_str = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ROOT, "/srv/blobs"),
            (ENV_DIGEST, "blake3"),
            (ENV_MODE, "plain"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.store.directory, PathBuf::from("/srv/blobs"));
        assert_eq!(config.store.digest, DigestAlgorithm::Blake3);
        assert_eq!(config.store.mode, StoreMode::Plain);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            ENV_DIGEST => Some("crc32".to_string()),
            ENV_MODE => Some("mirror".to_string()),
            _ => None,
        });
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_store_config_conversion() {
        let mut config = Config::default();
        config.store.directory = PathBuf::from("/data/blobs");
        config.store.verify_duplicates = true;
        config.store.income_max_age_secs = 60;

        let store = config.store_config();
        assert_eq!(store.directory, PathBuf::from("/data/blobs"));
        assert_eq!(store.mode, StoreMode::RefCounted);
        assert!(store.verify_duplicates);
        assert_eq!(store.income_max_age, Duration::from_secs(60));
    }

    #[test]
    fn test_merge_applies_only_keys_present() {
        let mut config = Config::default();
        config.store.mode = StoreMode::Plain;
        config.store.verify_duplicates = true;
        config.logging.level = "info".to_string();

        let overlay: ConfigOverlay =
            toml::from_str("[store]\nmode = \"refcount\"\n\n[logging]\nlevel = \"warn\"\n")
                .unwrap();
        config.merge(overlay);

        assert_eq!(config.store.mode, StoreMode::RefCounted);
        assert_eq!(config.logging.level, "warn");
        assert!(config.store.verify_duplicates);
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_warn() {
        let mut config = Config::default();
        config.logging.level = "chatty".to_string();
        assert_eq!(config.log_level(), LogLevel::Warn);
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level(), LogLevel::Debug);
    }
}
