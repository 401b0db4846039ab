//! Error types for scanpad-core operations.
//!
//! Lookup and conflict results of session validation are not errors; see
//! [`crate::session::ValidateOutcome`].

use std::path::PathBuf;

use crate::display::DisplayError;

/// All errors that can occur in scanpad-core operations.
#[derive(Debug, thiserror::Error)]
pub enum ScanpadError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Metadata unavailable from {source_name}: {details}")]
    MetadataUnavailable {
        source_name: String,
        details: String,
    },

    #[error("Unknown payload mode: {0} (expected json, image or url)")]
    InvalidMode(String),

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session id {id:?}: {reason}")]
    InvalidSessionId { id: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Rendering / Device Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Code image generation failed: {0}")]
    CodeImage(String),

    #[error("Display device failure: {0}")]
    Display(#[from] DisplayError),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ScanpadError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ScanpadError::Io {
            context: context.into(),
            source,
        }
    }

    /// Device failures end the display loop; everything else is recoverable
    /// by the caller.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, ScanpadError::Display(_))
    }
}

/// Convenience type alias for Results using ScanpadError.
pub type Result<T> = std::result::Result<T, ScanpadError>;

impl From<ScanpadError> for String {
    fn from(err: ScanpadError) -> String {
        err.to_string()
    }
}
