//! Metadata document loading.
//!
//! A metadata document is a JSON object with the required string keys
//! `name`, `description` and `image`. Loading never fails: when the document
//! is absent, unreadable or incomplete, the built-in default is used as a
//! whole. Fields are never mixed between the document and the default.

use std::path::{Path, PathBuf};

use fs_err as fs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanpadError};

static DEFAULT_METADATA: Lazy<Metadata> = Lazy::new(|| Metadata {
    name: "yama log e-paper".to_string(),
    description: "yama log QRe-paper".to_string(),
    image: "https://example.com/scanpad.png".to_string(),
});

/// Descriptive fields shown on the device and encoded in `json` payloads.
///
/// Field order here is the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub image: String,
}

impl Default for Metadata {
    fn default() -> Self {
        DEFAULT_METADATA.clone()
    }
}

/// Where the metadata in use came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOrigin {
    Document(PathBuf),
    Default,
}

#[derive(Debug, Clone)]
pub struct LoadedMetadata {
    pub metadata: Metadata,
    pub origin: MetadataOrigin,
}

/// Loads metadata from `source` (a path or `file://` URI), falling back to
/// the default on any configuration error. The fallback is logged.
pub fn load_metadata(source: Option<&str>) -> LoadedMetadata {
    let Some(source) = source.map(str::trim).filter(|s| !s.is_empty()) else {
        return LoadedMetadata {
            metadata: Metadata::default(),
            origin: MetadataOrigin::Default,
        };
    };

    match read_document(source) {
        Ok((path, metadata)) => LoadedMetadata {
            metadata,
            origin: MetadataOrigin::Document(path),
        },
        Err(err) => {
            tracing::warn!(error = %err, source = %source, "Using default metadata");
            LoadedMetadata {
                metadata: Metadata::default(),
                origin: MetadataOrigin::Default,
            }
        }
    }
}

fn read_document(source: &str) -> Result<(PathBuf, Metadata)> {
    let path = resolve_source(source)?;
    let content = fs::read_to_string(&path).map_err(|err| ScanpadError::MetadataUnavailable {
        source_name: source.to_string(),
        details: err.to_string(),
    })?;
    let metadata = parse_document(&content).map_err(|details| {
        ScanpadError::MetadataUnavailable {
            source_name: source.to_string(),
            details,
        }
    })?;
    Ok((path, metadata))
}

fn resolve_source(source: &str) -> Result<PathBuf> {
    if let Some(rest) = source.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if source.contains("://") {
        return Err(ScanpadError::MetadataUnavailable {
            source_name: source.to_string(),
            details: "only local paths and file:// URIs are supported".to_string(),
        });
    }
    Ok(Path::new(source).to_path_buf())
}

/// Parses a metadata document. Extra keys are tolerated; the three required
/// keys must all be present and be strings.
pub fn parse_document(content: &str) -> std::result::Result<Metadata, String> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|err| format!("invalid JSON: {}", err))?;
    let object = value
        .as_object()
        .ok_or_else(|| "document must be a JSON object".to_string())?;

    let field = |key: &str| -> std::result::Result<String, String> {
        object
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| format!("missing required string key '{}'", key))
    };

    Ok(Metadata {
        name: field("name")?,
        description: field("description")?,
        image: field("image")?,
    })
}
