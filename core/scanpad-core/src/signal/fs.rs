//! Directory-backed signal channel.
//!
//! # Layout
//!
//! ```text
//! {signal_dir}/
//! ├── scanned_{session_id}.flag   # one per scanned session
//! └── scanned_@any.flag           # wildcard
//! ```
//!
//! Each marker holds the RFC3339 time it was raised. Markers are written to
//! a temp file and renamed into place, so readers never see a partial file.
//! Removal is the consume step: the filesystem lets exactly one `unlink`
//! succeed.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::{SignalChannel, SignalKey};
use crate::error::{Result, ScanpadError};

const MARKER_PREFIX: &str = "scanned_";
const MARKER_SUFFIX: &str = ".flag";
const WILDCARD_STEM: &str = "@any";

#[derive(Debug, Clone)]
pub struct FsSignalChannel {
    dir: PathBuf,
}

impl FsSignalChannel {
    /// Opens (and creates if needed) the marker directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            ScanpadError::io(format!("create signal dir {}", dir.display()), err)
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, key: &SignalKey) -> PathBuf {
        self.dir.join(marker_file_name(key))
    }
}

fn marker_file_name(key: &SignalKey) -> String {
    let stem = match key {
        SignalKey::Session(id) => id.as_str(),
        SignalKey::Wildcard => WILDCARD_STEM,
    };
    format!("{}{}{}", MARKER_PREFIX, stem, MARKER_SUFFIX)
}

fn parse_marker_name(name: &str) -> Option<SignalKey> {
    let stem = name
        .strip_prefix(MARKER_PREFIX)?
        .strip_suffix(MARKER_SUFFIX)?;
    if stem == WILDCARD_STEM {
        return Some(SignalKey::Wildcard);
    }
    SignalKey::session(stem).ok()
}

impl SignalChannel for FsSignalChannel {
    fn raise(&self, key: &SignalKey) -> Result<()> {
        let path = self.marker_path(key);
        let context = || format!("write signal marker {}", path.display());

        let mut temp =
            NamedTempFile::new_in(&self.dir).map_err(|err| ScanpadError::io(context(), err))?;
        temp.write_all(Utc::now().to_rfc3339().as_bytes())
            .map_err(|err| ScanpadError::io(context(), err))?;
        temp.persist(&path)
            .map_err(|err| ScanpadError::io(context(), err.error))?;

        tracing::debug!(key = %key, path = %path.display(), "Signal raised");
        Ok(())
    }

    fn take(&self, key: &SignalKey) -> Result<bool> {
        let path = self.marker_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(key = %key, "Signal consumed");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ScanpadError::io(
                format!("remove signal marker {}", path.display()),
                err,
            )),
        }
    }

    fn pending(&self) -> Result<Vec<SignalKey>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.io_error().map(|e| e.kind()) == Some(ErrorKind::NotFound) => {
                    continue
                }
                Err(err) => {
                    return Err(ScanpadError::io(
                        format!("list signal dir {}", self.dir.display()),
                        err.into(),
                    ))
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = entry.file_name().to_str().and_then(parse_marker_name) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn raised_at(&self, key: &SignalKey) -> Result<Option<DateTime<Utc>>> {
        let path = self.marker_path(key);
        let context = || format!("read signal marker {}", path.display());
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ScanpadError::io(context(), err)),
        };
        if let Ok(stamp) = DateTime::parse_from_rfc3339(contents.trim()) {
            return Ok(Some(stamp.with_timezone(&Utc)));
        }

        // Markers written by other tools may be empty.
        match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => Ok(Some(DateTime::<Utc>::from(modified))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ScanpadError::io(context(), err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(id: &str) -> SignalKey {
        SignalKey::session(id).expect("valid key")
    }

    #[test]
    fn marker_names_round_trip() {
        assert_eq!(marker_file_name(&key("abc")), "scanned_abc.flag");
        assert_eq!(marker_file_name(&SignalKey::Wildcard), "scanned_@any.flag");
        assert_eq!(parse_marker_name("scanned_abc.flag"), Some(key("abc")));
        assert_eq!(
            parse_marker_name("scanned_@any.flag"),
            Some(SignalKey::Wildcard)
        );
        assert_eq!(parse_marker_name("notes.txt"), None);
        assert_eq!(parse_marker_name("scanned_bad id.flag"), None);
    }

    #[test]
    fn raise_is_idempotent_and_take_is_exclusive() {
        let temp = tempfile::tempdir().expect("temp dir");
        let channel = FsSignalChannel::open(temp.path().join("signals")).expect("open");

        channel.raise(&key("s1")).expect("raise");
        channel.raise(&key("s1")).expect("raise again");
        assert_eq!(channel.pending().expect("pending"), vec![key("s1")]);

        assert!(channel.take(&key("s1")).expect("take"));
        assert!(!channel.take(&key("s1")).expect("take again"));
    }

    #[test]
    fn pending_skips_foreign_files() {
        let temp = tempfile::tempdir().expect("temp dir");
        let channel = FsSignalChannel::open(temp.path()).expect("open");
        fs::write(temp.path().join("README"), "x").expect("write");
        channel.raise(&SignalKey::Wildcard).expect("raise");

        assert_eq!(channel.pending().expect("pending"), vec![SignalKey::Wildcard]);
    }

    #[test]
    fn separate_handles_share_markers() {
        let temp = tempfile::tempdir().expect("temp dir");
        let writer = FsSignalChannel::open(temp.path()).expect("open writer");
        let reader = FsSignalChannel::open(temp.path()).expect("open reader");

        writer.raise(&key("s1")).expect("raise");
        let outcome = reader
            .try_consume(&key("s1"), Duration::from_secs(5), Duration::from_millis(20))
            .expect("consume");
        assert!(outcome.is_consumed());
        assert!(!temp.path().join("scanned_s1.flag").exists());
    }

    #[test]
    fn sweep_removes_everything() {
        let temp = tempfile::tempdir().expect("temp dir");
        let channel = FsSignalChannel::open(temp.path()).expect("open");
        channel.raise(&key("a")).expect("raise");
        channel.raise(&key("b")).expect("raise");
        channel.raise(&SignalKey::Wildcard).expect("raise");

        assert_eq!(channel.sweep().expect("sweep"), 3);
        assert!(channel.pending().expect("pending").is_empty());
    }

    #[test]
    fn raised_at_reads_marker_time() {
        let temp = tempfile::tempdir().expect("temp dir");
        let channel = FsSignalChannel::open(temp.path()).expect("open");
        let before = Utc::now() - chrono::Duration::seconds(1);
        channel.raise(&key("s1")).expect("raise");

        let stamp = channel
            .raised_at(&key("s1"))
            .expect("raised_at")
            .expect("marker time");
        assert!(stamp >= before);
        assert_eq!(channel.raised_at(&key("s2")).expect("raised_at"), None);
    }

    #[test]
    fn empty_marker_falls_back_to_file_time() {
        let temp = tempfile::tempdir().expect("temp dir");
        let channel = FsSignalChannel::open(temp.path()).expect("open");
        fs::write(temp.path().join("scanned_s1.flag"), "").expect("write marker");

        assert!(channel.raised_at(&key("s1")).expect("raised_at").is_some());
        let removed = channel
            .expire_older_than(Utc::now() + chrono::Duration::seconds(5))
            .expect("expire");
        assert_eq!(removed, 1);
    }
}
