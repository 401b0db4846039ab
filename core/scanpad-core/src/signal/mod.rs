//! Signal Channel: "a scan happened" markers shared between the receiver
//! (writer) and the display loop (reader).
//!
//! # Protocol
//!
//! ```text
//! receiver ── raise(id) ──▶ [ marker for id ] ──▶ try_consume(id) ── display loop
//!                           [ marker for *  ]
//! ```
//!
//! The channel is level-triggered on existence: a marker raised before any
//! poller attaches is still seen on the next tick. `raise` is idempotent and
//! never blocks. Consumption removes the marker, and removal is the
//! exclusive step, so two pollers can never both consume the same marker.
//!
//! # Wildcards
//!
//! A wildcard marker (`*`) is not bound to a session. Under
//! [`WildcardPolicy::BindToCurrent`] it satisfies whichever session is
//! polling at the time; the display loop discards any wildcard that is
//! already present when it generates a new session, so an old scan burst
//! cannot confirm a code that was not on screen yet. Under
//! [`WildcardPolicy::Ignore`] pollers only match their own id.
//!
//! When a poller consumes its own marker it also removes a pending wildcard
//! in the same pass.
//!
//! # Implementations
//!
//! - [`FsSignalChannel`]: one marker file per key in a shared directory
//! - [`MemorySignalChannel`]: in-process set, used by tests and single-process setups

mod fs;
mod memory;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanpadError};

pub use fs::FsSignalChannel;
pub use memory::MemorySignalChannel;

/// Lower bound on the sleep between polls so a zero interval cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKey {
    Session(String),
    Wildcard,
}

impl SignalKey {
    /// Key for a specific session. The id must pass protocol validation
    /// because it ends up in file names.
    pub fn session(id: &str) -> Result<Self> {
        scanpad_protocol::validate_session_id(id).map_err(|err| {
            ScanpadError::InvalidSessionId {
                id: id.to_string(),
                reason: err.message,
            }
        })?;
        Ok(SignalKey::Session(id.to_string()))
    }

    /// Parses a raw key, accepting `*` as the wildcard.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim() == scanpad_protocol::WILDCARD_KEY {
            Ok(SignalKey::Wildcard)
        } else {
            SignalKey::session(raw.trim())
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, SignalKey::Wildcard)
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKey::Session(id) => f.write_str(id),
            SignalKey::Wildcard => f.write_str(scanpad_protocol::WILDCARD_KEY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WildcardPolicy {
    #[default]
    BindToCurrent,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// A marker was consumed; carries the key that matched.
    Consumed(SignalKey),
    TimedOut,
    /// The caller's cancellation check fired between ticks.
    Cancelled,
}

impl ConsumeOutcome {
    pub fn is_consumed(&self) -> bool {
        matches!(self, ConsumeOutcome::Consumed(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
    pub wildcard: WildcardPolicy,
}

impl PollOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            wildcard: WildcardPolicy::default(),
        }
    }

    pub fn with_wildcard(mut self, policy: WildcardPolicy) -> Self {
        self.wildcard = policy;
        self
    }
}

pub trait SignalChannel: Send + Sync {
    /// Creates the marker for `key` if it is not already there.
    fn raise(&self, key: &SignalKey) -> Result<()>;

    /// Removes the marker for `key`. Returns `true` only for the caller that
    /// actually removed it.
    fn take(&self, key: &SignalKey) -> Result<bool>;

    /// Keys that currently have a marker, in no particular order.
    fn pending(&self) -> Result<Vec<SignalKey>>;

    /// When the marker for `key` was raised, if the channel records it.
    fn raised_at(&self, _key: &SignalKey) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    /// Polls for `key` until it (or an admissible wildcard) is consumed, the
    /// timeout elapses, or `cancelled` returns true after a tick.
    ///
    /// The first check happens immediately, so an already-raised marker is
    /// consumed without sleeping. A poll that never matches returns
    /// `TimedOut` no earlier than `options.timeout`.
    fn try_consume_until(
        &self,
        key: &SignalKey,
        options: &PollOptions,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<ConsumeOutcome> {
        let interval = options.interval.max(MIN_POLL_INTERVAL);
        let deadline = Instant::now() + options.timeout;

        loop {
            if let Some(matched) = consume_once(self, key, options.wildcard)? {
                return Ok(ConsumeOutcome::Consumed(matched));
            }
            if cancelled() {
                return Ok(ConsumeOutcome::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(ConsumeOutcome::TimedOut);
            }
            thread::sleep(interval.min(deadline - now));
        }
    }

    /// [`SignalChannel::try_consume_until`] without cancellation and with
    /// wildcards bound to the caller.
    fn try_consume(
        &self,
        key: &SignalKey,
        timeout: Duration,
        interval: Duration,
    ) -> Result<ConsumeOutcome> {
        self.try_consume_until(key, &PollOptions::new(timeout, interval), &|| false)
    }

    /// Removes a marker if present, ignoring whether one existed.
    fn discard(&self, key: &SignalKey) -> Result<()> {
        self.take(key).map(|_| ())
    }

    /// Removes every pending marker. Returns how many were removed.
    fn sweep(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.pending()? {
            if self.take(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Removes every session marker, leaving a wildcard in place.
    fn sweep_sessions(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.pending()? {
            if !key.is_wildcard() && self.take(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Removes markers raised before `cutoff`. Markers without a recorded
    /// time are kept.
    fn expire_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for key in self.pending()? {
            let stale = matches!(self.raised_at(&key)?, Some(at) if at < cutoff);
            if stale && self.take(&key)? {
                tracing::debug!(key = %key, "Expired stale signal");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn consume_once<C: SignalChannel + ?Sized>(
    channel: &C,
    key: &SignalKey,
    policy: WildcardPolicy,
) -> Result<Option<SignalKey>> {
    if channel.take(key)? {
        if !key.is_wildcard() && channel.take(&SignalKey::Wildcard)? {
            tracing::debug!(key = %key, "Swept wildcard alongside specific signal");
        }
        return Ok(Some(key.clone()));
    }

    if !key.is_wildcard()
        && policy == WildcardPolicy::BindToCurrent
        && channel.take(&SignalKey::Wildcard)?
    {
        return Ok(Some(SignalKey::Wildcard));
    }

    Ok(None)
}
