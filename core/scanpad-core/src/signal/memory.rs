use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{SignalChannel, SignalKey};
use crate::error::Result;

/// In-process signal channel. Same semantics as the directory-backed one,
/// minus the cross-process reach.
#[derive(Debug, Default)]
pub struct MemorySignalChannel {
    pending: Mutex<HashMap<SignalKey, DateTime<Utc>>>,
}

impl MemorySignalChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalChannel for MemorySignalChannel {
    fn raise(&self, key: &SignalKey) -> Result<()> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.clone(), Utc::now());
        Ok(())
    }

    fn take(&self, key: &SignalKey) -> Result<bool> {
        Ok(self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some())
    }

    fn pending(&self) -> Result<Vec<SignalKey>> {
        let mut keys: Vec<SignalKey> = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn raised_at(&self, key: &SignalKey) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied())
    }
}
