//! Session Store: ephemeral records of minted codes and whether they have
//! been used.
//!
//! # Consistency
//!
//! Each session carries its own `AtomicBool`. `validate` is a single
//! compare-and-swap on that flag, so for one id exactly one caller ever sees
//! [`ValidateOutcome::FirstSuccess`]. The map itself sits behind an `RwLock`;
//! readers share it, so requests for different ids never wait on each
//! other's transitions. `validate` flips the flag while still holding the
//! read lock, which keeps pruning from racing a validation.
//!
//! Pruning forgets pending sessions outright. A validated session leaves its
//! id behind as a tombstone so it keeps reporting `validated` and never
//! validates again.
//!
//! Nothing is persisted. Restarting the process forgets every session.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use scanpad_protocol::SessionStatus;
use serde::Serialize;

use crate::error::{Result, ScanpadError};
use crate::metadata::Metadata;

/// Result of the at-most-once `pending -> validated` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidateOutcome {
    FirstSuccess,
    AlreadyUsed,
    NotFound,
}

/// One minted code. Everything except `validated` is fixed at creation.
#[derive(Debug)]
pub struct QrSession {
    id: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    metadata: Metadata,
    validated: AtomicBool,
}

impl QrSession {
    /// Mints a session with a fresh ULID.
    pub fn mint(metadata: Metadata, payload: Vec<u8>) -> Self {
        Self::with_id(new_session_id(), metadata, payload)
    }

    pub fn with_id(id: String, metadata: Metadata, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload,
            created_at: Utc::now(),
            metadata,
            validated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    fn mark_validated(&self) -> bool {
        self.validated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn snapshot(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            payload: self.payload.clone(),
            created_at: self.created_at,
            metadata: self.metadata.clone(),
            validated: self.is_validated(),
        }
    }
}

/// Point-in-time copy of a session handed out by [`SessionStore::get`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub validated: bool,
}

pub fn new_session_id() -> String {
    ulid::Ulid::new().to_string()
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<QrSession>>>,
    retired: RwLock<HashSet<String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints an id, builds the payload for it and stores the record as
    /// pending. The payload closure receives the new id so web sessions can
    /// embed their own validation URL.
    pub fn create<F>(&self, metadata: Metadata, build_payload: F) -> Result<String>
    where
        F: FnOnce(&str) -> Result<Vec<u8>>,
    {
        let id = new_session_id();
        let payload = build_payload(&id)?;
        let session = Arc::new(QrSession::with_id(id.clone(), metadata, payload));

        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone(), session);

        tracing::debug!(session_id = %id, "Session created");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<SessionRecord> {
        self.lookup(id)
            .map(|session| session.snapshot())
            .ok_or_else(|| ScanpadError::SessionNotFound(id.to_string()))
    }

    /// The at-most-once transition. Safe to call concurrently for the same id.
    pub fn validate(&self, id: &str) -> ValidateOutcome {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match sessions.get(id) {
            Some(session) if session.mark_validated() => ValidateOutcome::FirstSuccess,
            Some(_) => ValidateOutcome::AlreadyUsed,
            None if self.is_retired(id) => ValidateOutcome::AlreadyUsed,
            None => ValidateOutcome::NotFound,
        }
    }

    pub fn status(&self, id: &str) -> SessionStatus {
        match self.lookup(id) {
            Some(session) if session.is_validated() => SessionStatus::Validated,
            Some(_) => SessionStatus::Pending,
            None if self.is_retired(id) => SessionStatus::Validated,
            None => SessionStatus::Unknown,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops sessions created more than `max_age` before `now`. Validated
    /// ones are kept as tombstones. Returns the number removed.
    pub fn prune_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.created_at() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        let mut retired = self
            .retired
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                if session.is_validated() {
                    retired.insert(id.clone());
                }
            }
        }
        expired.len()
    }

    fn is_retired(&self, id: &str) -> bool {
        self.retired
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(id)
    }

    fn lookup(&self, id: &str) -> Option<Arc<QrSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn create(store: &SessionStore) -> String {
        store
            .create(Metadata::default(), |id| Ok(id.as_bytes().to_vec()))
            .expect("create session")
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = SessionStore::new();
        assert_eq!(store.validate("nope"), ValidateOutcome::NotFound);
        assert_eq!(store.validate("nope"), ValidateOutcome::NotFound);
        assert_eq!(store.status("nope"), SessionStatus::Unknown);
        assert!(matches!(
            store.get("nope"),
            Err(ScanpadError::SessionNotFound(_))
        ));
    }

    #[test]
    fn second_validation_is_already_used() {
        let store = SessionStore::new();
        let id = create(&store);

        assert_eq!(store.status(&id), SessionStatus::Pending);
        assert_eq!(store.validate(&id), ValidateOutcome::FirstSuccess);
        assert_eq!(store.validate(&id), ValidateOutcome::AlreadyUsed);
        assert_eq!(store.validate(&id), ValidateOutcome::AlreadyUsed);
        assert_eq!(store.status(&id), SessionStatus::Validated);
        assert!(store.get(&id).expect("record").validated);
    }

    #[test]
    fn payload_closure_receives_new_id() {
        let store = SessionStore::new();
        let id = create(&store);
        let record = store.get(&id).expect("record");
        assert_eq!(record.payload, id.as_bytes());
        assert!(!record.validated);
    }

    #[test]
    fn payload_failure_stores_nothing() {
        let store = SessionStore::new();
        let result = store.create(Metadata::default(), |_| {
            Err(ScanpadError::CodeImage("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_validation_has_single_winner() {
        const CALLERS: usize = 16;
        let store = SessionStore::new();
        let id = create(&store);
        let barrier = Barrier::new(CALLERS);

        let outcomes: Vec<ValidateOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        store.validate(&id)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("join"))
                .collect()
        });

        let winners = outcomes
            .iter()
            .filter(|o| **o == ValidateOutcome::FirstSuccess)
            .count();
        let losers = outcomes
            .iter()
            .filter(|o| **o == ValidateOutcome::AlreadyUsed)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(losers, CALLERS - 1);
        assert_eq!(store.status(&id), SessionStatus::Validated);
    }

    #[test]
    fn different_ids_are_independent() {
        let store = SessionStore::new();
        let a = create(&store);
        let b = create(&store);

        assert_eq!(store.validate(&a), ValidateOutcome::FirstSuccess);
        assert_eq!(store.status(&b), SessionStatus::Pending);
        assert_eq!(store.validate(&b), ValidateOutcome::FirstSuccess);
    }

    #[test]
    fn prune_removes_only_old_sessions() {
        let store = SessionStore::new();
        let id = create(&store);

        assert_eq!(store.prune_older_than(Duration::hours(1), Utc::now()), 0);
        assert!(store.contains(&id));

        let later = Utc::now() + Duration::hours(2);
        assert_eq!(store.prune_older_than(Duration::hours(1), later), 1);
        assert_eq!(store.status(&id), SessionStatus::Unknown);
        assert_eq!(store.validate(&id), ValidateOutcome::NotFound);
    }

    #[test]
    fn pruned_validated_session_stays_validated() {
        let store = SessionStore::new();
        let id = create(&store);
        assert_eq!(store.validate(&id), ValidateOutcome::FirstSuccess);

        let later = Utc::now() + Duration::hours(2);
        assert_eq!(store.prune_older_than(Duration::hours(1), later), 1);

        assert!(!store.contains(&id));
        assert_eq!(store.status(&id), SessionStatus::Validated);
        assert_eq!(store.validate(&id), ValidateOutcome::AlreadyUsed);
        assert!(store.get(&id).is_err());
    }
}
