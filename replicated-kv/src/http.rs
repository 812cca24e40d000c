//! JSON-over-HTTP surface for a replica.
//!
//! A single resource at `/`:
//!
//! - `PUT /` with `{"key": "...", "value": "..."}` submits a write. The body
//!   is parsed as JSON whatever `Content-Type` the client sent, so a bare
//!   `curl -d` works
//! - `GET /?key=...` reads a key after catching the store up
//!
//! Both answer `{"leader": ..., "key": ..., "value": ...}`. `leader` is the
//! current leader's API address (or `null`); `key` and `value` are omitted
//! when a write was not committed or a read found nothing.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::coordinator::{Coordinator, ReadOutcome, WriteOutcome};
use crate::errors::KvError;

/// Shared application state passed to handlers via `axum::extract::State`.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadParams {
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvResponse {
    pub leader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl From<WriteOutcome> for KvResponse {
    fn from(outcome: WriteOutcome) -> Self {
        match outcome {
            WriteOutcome::Committed { key, value, leader } => KvResponse {
                leader,
                key: Some(key),
                value: Some(value),
            },
            WriteOutcome::Redirect { leader } => KvResponse {
                leader,
                key: None,
                value: None,
            },
        }
    }
}

impl From<ReadOutcome> for KvResponse {
    fn from(outcome: ReadOutcome) -> Self {
        KvResponse {
            leader: outcome.leader,
            key: Some(outcome.key),
            value: outcome.value,
        }
    }
}

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/", get(handle_read).put(handle_write))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { coordinator })
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, coordinator: Arc<Coordinator>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "http api listening");
    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn handle_write(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<KvResponse>, KvError> {
    let request = parse_write(&body)?;
    let key = request
        .key
        .ok_or_else(|| KvError::invalid("missing required field `key`"))?;
    let value = request.value.unwrap_or_default();

    let coordinator = Arc::clone(&state.coordinator);
    let outcome = run_blocking(move || coordinator.write(key, value)).await?;
    Ok(Json(outcome.into()))
}

async fn handle_read(
    State(state): State<AppState>,
    params: Result<Query<ReadParams>, QueryRejection>,
) -> Result<Json<KvResponse>, KvError> {
    let Query(params) = params.map_err(|rejection| KvError::invalid(rejection.body_text()))?;
    let key = params
        .key
        .ok_or_else(|| KvError::invalid("missing required query parameter `key`"))?;

    let coordinator = Arc::clone(&state.coordinator);
    let outcome = run_blocking(move || coordinator.read(key)).await?;
    Ok(Json(outcome.into()))
}

/// Decodes a write body. Content type is not checked.
fn parse_write(body: &[u8]) -> Result<WriteRequest, KvError> {
    serde_json::from_slice(body)
        .map_err(|err| KvError::invalid(format!("malformed write body: {err}")))
}

/// The coordinator blocks on the consensus service and on locks, so calls
/// run on Tokio's blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, KvError>
where
    F: FnOnce() -> Result<T, KvError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| KvError::Internal(format!("request task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_omits_key_and_value() {
        let body = serde_json::to_value(KvResponse::from(WriteOutcome::Redirect {
            leader: Some("127.0.0.1:8102".into()),
        }))
        .unwrap();
        assert_eq!(body, serde_json::json!({ "leader": "127.0.0.1:8102" }));
    }

    #[test]
    fn test_parse_write_defaults_missing_value() {
        let request = parse_write(br#"{"key": "a"}"#).unwrap();
        assert_eq!(request.key.as_deref(), Some("a"));
        assert_eq!(request.value, None);
    }

    #[test]
    fn test_parse_write_rejects_non_json() {
        let err = parse_write(b"key=a&value=1").unwrap_err();
        assert!(matches!(err, KvError::InvalidRequest(_)));
    }

    #[test]
    fn test_absent_read_keeps_key_and_null_leader() {
        let body = serde_json::to_value(KvResponse::from(ReadOutcome {
            key: "missing".into(),
            value: None,
            leader: None,
        }))
        .unwrap();
        assert_eq!(body, serde_json::json!({ "leader": null, "key": "missing" }));
    }
}
