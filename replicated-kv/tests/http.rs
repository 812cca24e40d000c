//! HTTP contract tests driven through the router without a socket.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use replicated_kv::config::AddressBook;
use replicated_kv::consensus::memory::MemoryConsensus;
use replicated_kv::coordinator::Coordinator;
use replicated_kv::http::{router, KvResponse};
use serde_json::Value;
use tower::ServiceExt;

fn app(local: u64, leader: Option<u64>) -> (Arc<MemoryConsensus>, Router) {
    let log = Arc::new(MemoryConsensus::new(local, leader));
    let addresses = AddressBook::new(
        vec!["127.0.0.1:7101".into(), "127.0.0.1:7102".into()],
        vec!["127.0.0.1:8101".into(), "127.0.0.1:8102".into()],
    )
    .expect("valid address book");
    let coordinator = Arc::new(Coordinator::new(log.clone(), addresses));
    (log, router(coordinator))
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn put(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

fn put_with_content_type(body: &str, content_type: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::PUT).uri("/");
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

#[tokio::test]
async fn put_then_get_round_trips() -> Result<()> {
    let (_log, app) = app(0, Some(0));

    let (status, body) = send(&app, put(r#"{"key": "a", "value": "1"}"#)).await?;
    assert_eq!(status, StatusCode::OK);
    let written: KvResponse = serde_json::from_value(body)?;
    assert_eq!(written.key.as_deref(), Some("a"));
    assert_eq!(written.value.as_deref(), Some("1"));
    assert_eq!(written.leader.as_deref(), Some("127.0.0.1:8101"));

    let (status, body) = send(&app, get("/?key=a")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({ "leader": "127.0.0.1:8101", "key": "a", "value": "1" })
    );
    Ok(())
}

#[tokio::test]
async fn put_without_content_type_is_parsed_as_json() -> Result<()> {
    let (log, app) = app(0, Some(0));

    let request = put_with_content_type(r#"{"key": "a", "value": "1"}"#, None);
    let (status, body) = send(&app, request).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({ "leader": "127.0.0.1:8101", "key": "a", "value": "1" })
    );
    assert_eq!(log.committed_len(), 1);
    Ok(())
}

#[tokio::test]
async fn put_with_form_content_type_is_parsed_as_json() -> Result<()> {
    // What `curl -d` sends by default.
    let (log, app) = app(0, Some(0));

    let request = put_with_content_type(
        r#"{"key": "b", "value": "2"}"#,
        Some("application/x-www-form-urlencoded"),
    );
    let (status, body) = send(&app, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "b");
    assert_eq!(log.committed_len(), 1);

    let (_, body) = send(&app, get("/?key=b")).await?;
    assert_eq!(body["value"], "2");
    Ok(())
}

#[tokio::test]
async fn follower_put_carries_leader_address_only() -> Result<()> {
    let (_log, app) = app(0, Some(1));

    let (status, body) = send(&app, put(r#"{"key": "a", "value": "1"}"#)).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "leader": "127.0.0.1:8102" }));
    Ok(())
}

#[tokio::test]
async fn get_missing_key_returns_absent_value() -> Result<()> {
    let (_log, app) = app(1, Some(0));

    let (status, body) = send(&app, get("/?key=missing")).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({ "leader": "127.0.0.1:8101", "key": "missing" })
    );
    Ok(())
}

#[tokio::test]
async fn get_without_key_parameter_is_bad_request() -> Result<()> {
    let (_log, app) = app(0, Some(0));

    let (status, body) = send(&app, get("/")).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("key"));
    Ok(())
}

#[tokio::test]
async fn malformed_put_body_is_bad_request() -> Result<()> {
    let (log, app) = app(0, Some(0));

    let (status, _) = send(&app, put("a:1")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, put(r#"{"value": "1"}"#)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(log.committed_len(), 0);
    Ok(())
}

#[tokio::test]
async fn unsupported_method_is_rejected() -> Result<()> {
    let (_log, app) = app(0, Some(0));
    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/")
        .body(Body::empty())?;

    let (status, _) = send(&app, request).await?;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn consensus_outage_is_service_unavailable() -> Result<()> {
    let (log, app) = app(0, Some(0));
    log.set_available(false);

    let (status, _) = send(&app, put(r#"{"key": "a", "value": "1"}"#)).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&app, get("/?key=a")).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
