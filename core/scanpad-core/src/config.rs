//! Device configuration.
//!
//! Precedence, lowest first: built-in defaults, `device.toml`, `SCANPAD_*`
//! environment variables, then command-line flags (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanpadError};
use crate::layout::Canvas;
use crate::payload::PayloadMode;
use crate::signal::WildcardPolicy;
use crate::storage::StorageConfig;

pub const ENV_MODE: &str = "SCANPAD_MODE";
pub const ENV_WAIT_FOR_ACK: &str = "SCANPAD_WAIT_FOR_ACK";
pub const ENV_TIMEOUT_SECS: &str = "SCANPAD_TIMEOUT_SECS";
pub const ENV_METADATA: &str = "SCANPAD_METADATA";
pub const ENV_FONT: &str = "SCANPAD_FONT";
pub const ENV_NODE_ID: &str = "SCANPAD_NODE_ID";
pub const ENV_SCAN_URL: &str = "SCANPAD_SCAN_URL";
pub const ENV_SIGNAL_DIR: &str = "SCANPAD_SIGNAL_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub mode: PayloadMode,
    pub wait_for_ack: bool,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub ack_dwell_secs: u64,
    /// Path or `file://` URI of the metadata document.
    pub metadata_source: Option<String>,
    pub font_source: Option<PathBuf>,
    pub node_id: String,
    pub scan_base_url: String,
    pub signal_dir: Option<PathBuf>,
    pub wildcard: WildcardPolicy,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub ack_message: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mode: PayloadMode::Json,
            wait_for_ack: true,
            timeout_secs: 10,
            poll_interval_ms: 1000,
            ack_dwell_secs: 5,
            metadata_source: None,
            font_source: None,
            node_id: "node-s-8213".to_string(),
            scan_base_url: "http://127.0.0.1:5000".to_string(),
            signal_dir: None,
            wildcard: WildcardPolicy::BindToCurrent,
            canvas_width: 122,
            canvas_height: 250,
            ack_message: "Scanned!".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn canvas(&self) -> Canvas {
        Canvas::new(self.canvas_width, self.canvas_height)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ack_dwell(&self) -> Duration {
        Duration::from_secs(self.ack_dwell_secs)
    }

    pub fn signal_dir_or(&self, storage: &StorageConfig) -> PathBuf {
        self.signal_dir
            .clone()
            .unwrap_or_else(|| storage.signals_dir())
    }

    /// Applies `SCANPAD_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparseable values are logged and
    /// skipped.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_MODE) {
            match value.parse::<PayloadMode>() {
                Ok(mode) => self.mode = mode,
                Err(err) => tracing::warn!(key = ENV_MODE, error = %err, "Ignoring override"),
            }
        }
        if let Some(value) = get(ENV_WAIT_FOR_ACK) {
            match parse_bool(&value) {
                Some(wait) => self.wait_for_ack = wait,
                None => tracing::warn!(key = ENV_WAIT_FOR_ACK, value = %value, "Ignoring override"),
            }
        }
        if let Some(value) = get(ENV_TIMEOUT_SECS) {
            match value.trim().parse::<u64>() {
                Ok(secs) => self.timeout_secs = secs,
                Err(err) => {
                    tracing::warn!(key = ENV_TIMEOUT_SECS, error = %err, "Ignoring override")
                }
            }
        }
        if let Some(value) = get(ENV_METADATA) {
            self.metadata_source = Some(value);
        }
        if let Some(value) = get(ENV_FONT) {
            self.font_source = Some(PathBuf::from(value));
        }
        if let Some(value) = get(ENV_NODE_ID) {
            self.node_id = value;
        }
        if let Some(value) = get(ENV_SCAN_URL) {
            self.scan_base_url = value;
        }
        if let Some(value) = get(ENV_SIGNAL_DIR) {
            self.signal_dir = Some(PathBuf::from(value));
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reads `device.toml`. A missing file yields defaults; a malformed one is an
/// error.
pub fn load_device_config(path: &Path) -> Result<DeviceConfig> {
    if !path.exists() {
        return Ok(DeviceConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|err| ScanpadError::io(format!("read {}", path.display()), err))?;
    toml::from_str::<DeviceConfig>(&content).map_err(|err| ScanpadError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
