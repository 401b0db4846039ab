//! Request handling behind the HTTP routes, free of transport details.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use scanpad_core::{
    CodeImager, Metadata, ScanpadError, SessionStore, SignalChannel, SignalKey, ValidateOutcome,
};
use scanpad_protocol::{
    validate_session_id, validate_url, ScanQuery, SessionStatus, StatusResponse, CODE_IMAGE_PATH,
    STATUS_PATH, WILDCARD_KEY,
};

use crate::pages;

pub const HTML: &str = "text/html; charset=utf-8";
pub const PNG: &str = "image/png";
pub const JSON: &str = "application/json";
pub const TEXT: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn new(status: StatusCode, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    fn html(status: StatusCode, body: String) -> Self {
        Self::new(status, HTML, body)
    }

    fn internal(err: &ScanpadError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, TEXT, err.to_string())
    }
}

pub struct ReceiverService {
    store: SessionStore,
    signals: Arc<dyn SignalChannel>,
    imager: Arc<dyn CodeImager>,
    metadata: Metadata,
    public_url: Option<String>,
    allow_wildcard: bool,
}

impl ReceiverService {
    pub fn new(
        signals: Arc<dyn SignalChannel>,
        imager: Arc<dyn CodeImager>,
        metadata: Metadata,
    ) -> Self {
        Self {
            store: SessionStore::new(),
            signals,
            imager,
            metadata,
            public_url: None,
            allow_wildcard: false,
        }
    }

    /// Base URL embedded in codes. Without it the request's Host is used.
    pub fn with_public_url(mut self, public_url: Option<String>) -> Self {
        self.public_url = public_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_wildcard(mut self, allow: bool) -> Self {
        self.allow_wildcard = allow;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// `GET /`: mints a session whose code is its own validation URL.
    pub fn index(&self, request_base: &str) -> Reply {
        let base = self.public_url.as_deref().unwrap_or(request_base);
        let created = self
            .store
            .create(self.metadata.clone(), |id| Ok(validate_url(base, id).into_bytes()));
        let id = match created {
            Ok(id) => id,
            Err(err) => return Reply::internal(&err),
        };

        tracing::info!(session_id = %id, "Session created");
        let page = pages::index(
            &id,
            &format!("{}/{}", CODE_IMAGE_PATH, id),
            &format!("{}/{}", STATUS_PATH, id),
            &validate_url(base, &id),
        );
        Reply::html(StatusCode::OK, page)
    }

    /// `GET /code_image/{id}`
    pub fn code_image(&self, id: &str) -> Reply {
        let record = match self.store.get(id) {
            Ok(record) => record,
            Err(ScanpadError::SessionNotFound(_)) => {
                return Reply::html(StatusCode::NOT_FOUND, pages::not_found(id))
            }
            Err(err) => return Reply::internal(&err),
        };

        match self
            .imager
            .encode(&record.payload)
            .and_then(|bitmap| bitmap.to_png())
        {
            Ok(png) => Reply::new(StatusCode::OK, PNG, png),
            Err(err) => {
                tracing::error!(session_id = %id, error = %err, "Code image failed");
                Reply::internal(&err)
            }
        }
    }

    /// `GET /validate/{id}`
    pub fn validate(&self, id: &str) -> Reply {
        let outcome = self.store.validate(id);
        tracing::info!(session_id = %id, outcome = ?outcome, "Validate");
        match outcome {
            ValidateOutcome::FirstSuccess => Reply::html(StatusCode::OK, pages::validated(id)),
            ValidateOutcome::AlreadyUsed => {
                Reply::html(StatusCode::BAD_REQUEST, pages::already_used(id))
            }
            ValidateOutcome::NotFound => Reply::html(StatusCode::NOT_FOUND, pages::not_found(id)),
        }
    }

    /// `GET /status/{id}`
    pub fn status(&self, id: &str) -> Reply {
        let response = StatusResponse::for_status(self.store.status(id));
        match serde_json::to_vec(&response) {
            Ok(body) => Reply::new(StatusCode::OK, JSON, body),
            Err(source) => Reply::internal(&ScanpadError::Json {
                context: "serialize status".to_string(),
                source,
            }),
        }
    }

    /// `GET /scan?session_id=`: raises the signal the device polls for.
    ///
    /// Missing or malformed ids are acknowledged without raising anything.
    /// A session this receiver minted is validated in place instead, since
    /// no device polls for it.
    pub fn scan(&self, query: &ScanQuery) -> Reply {
        let raw = query
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let Some(raw) = raw else {
            tracing::warn!("Scan without session_id; treated as unknown");
            return Reply::html(StatusCode::OK, pages::scan_ack(None, false));
        };

        let key = if raw == WILDCARD_KEY {
            if !self.allow_wildcard {
                tracing::warn!("Wildcard scan rejected; start with --allow-wildcard to accept");
                return Reply::html(StatusCode::OK, pages::scan_ack(Some(raw), false));
            }
            SignalKey::Wildcard
        } else {
            if let Err(err) = validate_session_id(raw) {
                tracing::warn!(session_id = %raw, error = %err, "Scan with invalid session_id");
                return Reply::html(StatusCode::OK, pages::scan_ack(Some(raw), false));
            }
            SignalKey::Session(raw.to_string())
        };

        if let SignalKey::Session(id) = &key {
            if self.store.status(id) != SessionStatus::Unknown {
                let outcome = self.store.validate(id);
                tracing::info!(session_id = %id, outcome = ?outcome, "Scan validated session");
                return Reply::html(StatusCode::OK, pages::scan_ack(Some(raw), true));
            }
        }

        if let Err(err) = self.signals.raise(&key) {
            tracing::error!(key = %key, error = %err, "Failed to raise scan signal");
            return Reply::internal(&err);
        }
        tracing::info!(
            key = %key,
            node_id = query.node_id.as_deref().unwrap_or("-"),
            "Scan signal raised"
        );
        Reply::html(StatusCode::OK, pages::scan_ack(Some(raw), true))
    }

    /// Drops sessions and scan signals older than `ttl`. Returns how many
    /// sessions were removed.
    pub fn prune(&self, ttl: chrono::Duration) -> usize {
        let now = Utc::now();
        let removed = self.store.prune_older_than(ttl, now);
        if removed > 0 {
            tracing::info!(removed, remaining = self.store.len(), "Pruned expired sessions");
        }
        match self.signals.expire_older_than(now - ttl) {
            Ok(0) => {}
            Ok(expired) => tracing::info!(expired, "Expired unclaimed scan signals"),
            Err(err) => tracing::warn!(error = %err, "Failed to expire scan signals"),
        }
        removed
    }
}
