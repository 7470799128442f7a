//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary store root
//! - A working directory for source files and project config
//!
//! # Usage
//!
//! ```ignore
//! use blobfs_config::testing::TestEnvironment;
//! use blobfs_store::{FileSource, FsBlobStore, StoreMode};
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let store = FsBlobStore::open(&env.store_config(StoreMode::RefCounted)).unwrap();
//!     let file = env.create_file("media/cover.jpg", b"...").unwrap();
//!     store.save(&mut FileSource::new(file)).unwrap();
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use blobfs_store::{StoreConfig, StoreMode};
use tempfile::TempDir;

use crate::{Config, PROJECT_CONFIG};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated store root directory (not created; opening a store does that)
    pub store_root: PathBuf,
    /// Working directory for source files and `.blobfs/config.toml`
    pub work_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let root = temp_dir.path();

        let work_dir = root.join("work");
        let store_root = root.join(format!("store-{}", test_id));
        std::fs::create_dir_all(&work_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            work_dir,
            test_id,
        })
    }

    /// Store settings rooted in this environment
    pub fn store_config(&self, mode: StoreMode) -> StoreConfig {
        StoreConfig::new(&self.store_root, mode)
    }

    /// Default config pointing at this environment's store
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.store.directory = self.store_root.clone();
        config
    }

    /// Path of the project config file inside the working directory
    pub fn project_config_path(&self) -> PathBuf {
        self.work_dir.join(PROJECT_CONFIG)
    }

    /// Write `.blobfs/config.toml` in the working directory
    pub fn write_project_config(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.project_config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Create a test file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.work_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Environment variables that point a spawned `blobfs` at this store
    pub fn cli_env(&self) -> Vec<(String, String)> {
        vec![(
            crate::ENV_ROOT.to_string(),
            self.store_root.to_string_lossy().into_owned(),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.work_dir.exists());
        assert!(!env.store_root.exists());
    }

    #[test]
    fn test_environment_has_unique_store_root() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.store_root, env2.store_root);
        assert_ne!(env1.test_id, env2.test_id);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("media/cover.jpg", b"jpeg").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }

    #[test]
    fn test_cli_env() {
        let env = TestEnvironment::new().unwrap();
        let vars = env.cli_env();
        assert!(vars.iter().any(|(k, _)| k == "BLOBFS_ROOT"));
    }
}
