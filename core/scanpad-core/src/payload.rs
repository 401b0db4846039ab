//! Payload Builder: turns metadata and a session identity into the bytes
//! that get encoded into the code image.
//!
//! Pure transform, no I/O. `json` payloads double as the audit record, so
//! their serialization is compact and key order is fixed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanpadError};
use crate::metadata::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// Compact JSON of `{name, description, image}`.
    #[default]
    Json,
    /// The raw image URL.
    Image,
    /// Callback URL to the receiver's scan endpoint.
    Url,
}

impl PayloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadMode::Json => "json",
            PayloadMode::Image => "image",
            PayloadMode::Url => "url",
        }
    }
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadMode {
    type Err = ScanpadError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(PayloadMode::Json),
            "image" => Ok(PayloadMode::Image),
            "url" => Ok(PayloadMode::Url),
            other => Err(ScanpadError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    mode: PayloadMode,
    scan_base_url: String,
}

impl PayloadBuilder {
    pub fn new(mode: PayloadMode, scan_base_url: impl Into<String>) -> Self {
        Self {
            mode,
            scan_base_url: scan_base_url.into(),
        }
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    /// Builds the payload for one session. `node_id` identifies the user or
    /// device and is only used by `url` mode.
    pub fn build(&self, metadata: &Metadata, session_id: &str, node_id: &str) -> Result<Vec<u8>> {
        match self.mode {
            PayloadMode::Json => serde_json::to_vec(metadata).map_err(|source| ScanpadError::Json {
                context: "serialize metadata payload".to_string(),
                source,
            }),
            PayloadMode::Image => Ok(metadata.image.as_bytes().to_vec()),
            PayloadMode::Url => Ok(scanpad_protocol::scan_url(
                &self.scan_base_url,
                session_id,
                node_id,
            )
            .into_bytes()),
        }
    }
}
