//! Path management for scanpad data.
//!
//! Production code uses `StorageConfig::default()`, rooted at `~/.scanpad/`.
//! Tests use `StorageConfig::with_root(temp_dir)` for isolation.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|home| home.join(".scanpad"))
            .unwrap_or_else(|| std::env::temp_dir().join("scanpad"));
        Self { root }
    }
}

impl StorageConfig {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Marker directory shared by the receiver and the device.
    pub fn signals_dir(&self) -> PathBuf {
        self.root.join("signals")
    }

    /// Device configuration (TOML).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("device.toml")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
