//! Wire types and validation shared by the scanpad receiver and devices.
//!
//! The receiver is the authority on what it accepts, but devices reuse the
//! same constants to build callback URLs so the two never drift apart.

use serde::{Deserialize, Serialize};

pub const SCAN_PATH: &str = "/scan";
pub const VALIDATE_PATH: &str = "/validate";
pub const STATUS_PATH: &str = "/status";
pub const CODE_IMAGE_PATH: &str = "/code_image";

/// Key that stands for "any pending session" in the signal channel.
pub const WILDCARD_KEY: &str = "*";

pub const MAX_SESSION_ID_LEN: usize = 128;

/// Read-only view of a session as reported by `/status/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Validated,
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Validated => "validated",
            SessionStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
}

impl StatusResponse {
    /// Unknown ids are reported as pending on the wire; pollers only care
    /// whether the code has been used yet.
    pub fn for_status(status: SessionStatus) -> Self {
        let status = match status {
            SessionStatus::Validated => SessionStatus::Validated,
            SessionStatus::Pending | SessionStatus::Unknown => SessionStatus::Pending,
        };
        Self { status }
    }
}

/// Query string of `/scan`.
///
/// `qr_id` is accepted as an alias so codes printed by older firmware keep
/// working.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanQuery {
    #[serde(default, alias = "qr_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Session ids end up in file names and URLs, so only a conservative
/// character set is allowed.
pub fn validate_session_id(id: &str) -> Result<(), ErrorInfo> {
    if id.trim().is_empty() {
        return Err(ErrorInfo::new("missing_session_id", "session_id is required"));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            format!(
                "session_id must be {} characters or fewer",
                MAX_SESSION_ID_LEN
            ),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            "session_id may only contain ASCII letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

/// Builds `<base>/scan?session_id=<id>&node_id=<node>`.
///
/// Both values are percent-encoded; `base` is used as given minus any
/// trailing slash.
pub fn scan_url(base: &str, session_id: &str, node_id: &str) -> String {
    format!(
        "{}{}?session_id={}&node_id={}",
        base.trim_end_matches('/'),
        SCAN_PATH,
        encode_query_component(session_id),
        encode_query_component(node_id)
    )
}

/// Builds `<base>/validate/<id>`.
pub fn validate_url(base: &str, session_id: &str) -> String {
    format!(
        "{}{}/{}",
        base.trim_end_matches('/'),
        VALIDATE_PATH,
        encode_query_component(session_id)
    )
}

fn encode_query_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
