//! Integration tests for routing, the JSON envelope and request ids.

use agenda_integration_tests::TestContext;
use agenda_server::error::INTERNAL_MESSAGE;
use agenda_server::middleware::REQUEST_ID_HEADER;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let ctx = TestContext::new().await;

    let resp = ctx.send(Method::GET, "/health", None, None).await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text, "ok");
}

#[tokio::test]
async fn test_readiness_follows_store() {
    let ctx = TestContext::new().await;
    assert_eq!(
        ctx.send(Method::GET, "/health/ready", None, None).await.status,
        StatusCode::OK
    );

    ctx.store.set_unavailable(true);
    assert_eq!(
        ctx.send(Method::GET, "/health/ready", None, None).await.status,
        StatusCode::SERVICE_UNAVAILABLE
    );
}

// ============================================================================
// Envelope
// ============================================================================

#[tokio::test]
async fn test_unknown_route_is_not_found_envelope() {
    let ctx = TestContext::new().await;

    let resp = ctx
        .send(Method::GET, "/nope", Some("token-t1"), None)
        .await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.msg(), "Not found: /nope");
}

#[tokio::test]
async fn test_wrong_method_is_not_found() {
    let ctx = TestContext::new().await;

    let resp = ctx
        .send(Method::DELETE, "/agendamentos/t1", Some("token-t1"), None)
        .await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert!(resp.json().get("msg").is_some());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let ctx = TestContext::new().await;

    let resp = ctx
        .send_raw(Method::POST, "/agendar/t1", Some("token-t1"), "{\"name\":")
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.msg().starts_with("invalid JSON body"));
}

#[tokio::test]
async fn test_malformed_json_from_other_tenant_is_forbidden() {
    let ctx = TestContext::new().await;

    let resp = ctx
        .send_raw(Method::POST, "/agendar/t2", Some("token-t1"), "{\"name\":")
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_store_outage_is_generic_internal_error() {
    let ctx = TestContext::new().await;
    ctx.store.set_unavailable(true);

    let resp = ctx.list("t1", "token-t1").await;

    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.msg(), INTERNAL_MESSAGE);
    assert!(!resp.text.contains("pool"));
}

// ============================================================================
// Request ids
// ============================================================================

#[tokio::test]
async fn test_every_response_carries_a_request_id() {
    let ctx = TestContext::new().await;

    for resp in [
        ctx.send(Method::GET, "/health", None, None).await,
        ctx.list("t1", "token-t1").await,
        ctx.list("t1", "forged").await,
        ctx.send(Method::GET, "/nope", None, None).await,
    ] {
        let id = resp
            .headers
            .get(REQUEST_ID_HEADER)
            .expect("x-request-id header");
        assert!(!id.is_empty());
    }
}

#[tokio::test]
async fn test_upstream_request_id_is_echoed() {
    let ctx = TestContext::new().await;
    let request = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "edge-1234")
        .body(Body::empty())
        .expect("Failed to build request");

    let resp = ctx
        .app
        .clone()
        .oneshot(request)
        .await
        .expect("Router is infallible");

    assert_eq!(
        resp.headers().get(REQUEST_ID_HEADER).map(|v| v.as_bytes()),
        Some(&b"edge-1234"[..])
    );
}
