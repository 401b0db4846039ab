//! Route table. Handlers only extract request parts and hand them to
//! [`ReceiverService`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use scanpad_protocol::ScanQuery;

use crate::service::{ReceiverService, Reply};

type Shared = Arc<ReceiverService>;

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response()
    }
}

pub fn router(service: Shared) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/code_image/:id", get(code_image))
        .route("/validate/:id", get(validate))
        .route("/status/:id", get(status))
        .route(scanpad_protocol::SCAN_PATH, get(scan))
        .with_state(service)
}

fn request_base(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("127.0.0.1");
    format!("http://{}", host)
}

async fn index(State(service): State<Shared>, headers: HeaderMap) -> Reply {
    service.index(&request_base(&headers))
}

/// Runs `work` on the blocking pool. QR encoding and marker file writes
/// stay off the reactor threads.
async fn blocking<F>(what: &'static str, work: F) -> Reply
where
    F: FnOnce() -> Reply + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::error!(task = what, error = %err, "Blocking task failed");
            Reply {
                status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                content_type: crate::service::TEXT,
                body: format!("{} task failed", what).into_bytes(),
            }
        }
    }
}

async fn code_image(State(service): State<Shared>, Path(id): Path<String>) -> Reply {
    blocking("code image", move || service.code_image(&id)).await
}

async fn validate(State(service): State<Shared>, Path(id): Path<String>) -> Reply {
    service.validate(&id)
}

async fn status(State(service): State<Shared>, Path(id): Path<String>) -> Reply {
    service.status(&id)
}

async fn scan(State(service): State<Shared>, Query(query): Query<ScanQuery>) -> Reply {
    blocking("scan", move || service.scan(&query)).await
}
