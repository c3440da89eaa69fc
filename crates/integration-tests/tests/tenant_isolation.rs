//! Integration tests for the tenant authorization gate.
//!
//! Every appointment route authorizes the caller against the tenant in the
//! path before touching the store.

use agenda_core::TenantId;
use agenda_integration_tests::{TestContext, booking};
use agenda_server::config::TenancyConfig;
use axum::http::{Method, StatusCode};
use serde_json::json;

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let ctx = TestContext::new().await;

    let resp = ctx.send(Method::GET, "/agendamentos/t1", None, None).await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.msg(), "Missing bearer token");
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() {
    let ctx = TestContext::new().await;

    let resp = ctx.list("t1", "forged").await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.msg(), "Invalid or expired token");
}

#[tokio::test]
async fn test_wrong_scheme_is_unauthorized() {
    let ctx = TestContext::new().await;
    let request = axum::http::Request::builder()
        .uri("/agendamentos/t1")
        .header("authorization", "Basic dXNlcjpwYXNz")
        .body(axum::body::Body::empty())
        .expect("Failed to build request");

    let resp = tower::ServiceExt::oneshot(ctx.app.clone(), request)
        .await
        .expect("Router is infallible");

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_identity_outage_is_unauthenticated() {
    let ctx = TestContext::with_identity_outage().await;

    let resp = ctx.list("t1", "token-t1").await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.msg(), "Token could not be verified");
    assert!(!resp.text.contains("identity provider"));
}

// ============================================================================
// Cross-tenant access
// ============================================================================

#[tokio::test]
async fn test_list_other_tenant_is_forbidden() {
    let ctx = TestContext::new().await;
    ctx.book_ok("t2", "token-t2", "2024-03-05", "10:00").await;

    let resp = ctx.list("t2", "token-t1").await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert!(resp.json().get("appointments").is_none());
}

#[tokio::test]
async fn test_book_other_tenant_is_forbidden() {
    let ctx = TestContext::new().await;

    let resp = ctx
        .book("t2", "token-t1", booking("2024-03-05", "10:00"))
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    let listed = ctx.list("t2", "token-t2").await;
    assert_eq!(listed.json()["appointments"], json!([]));
}

#[tokio::test]
async fn test_writes_on_other_tenant_rows_are_forbidden() {
    let ctx = TestContext::new().await;
    let id = ctx.book_ok("t2", "token-t2", "2024-03-05", "10:00").await;

    for (op, body) in [
        ("confirmar", None),
        ("cancelar", None),
        (
            "reagendar",
            Some(json!({"newDate": "2024-03-06", "newTime": "11:00"})),
        ),
    ] {
        let resp = ctx.act(op, "t2", &id, "token-t1", body).await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN, "{op}");
    }

    let listed = ctx.list("t2", "token-t2").await.json();
    let row = &listed["appointments"][0];
    assert_eq!(row["status"], "pending");
    assert_eq!(row["date"], "2024-03-05");
    assert_eq!(row["time"], "10:00");
}

#[tokio::test]
async fn test_row_of_other_tenant_is_not_found_in_own_scope() {
    let ctx = TestContext::new().await;
    let id = ctx.book_ok("t2", "token-t2", "2024-03-05", "10:00").await;

    let resp = ctx.act("confirmar", "t1", &id, "token-t1", None).await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_acts_on_any_tenant() {
    let ctx = TestContext::new().await;
    let id = ctx.book_ok("t1", "token-admin", "2024-03-05", "10:00").await;

    let resp = ctx.act("confirmar", "t1", &id, "token-admin", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["appointment"]["tenant_id"], "t1");

    let listed = ctx.list("t1", "token-t1").await.json();
    assert_eq!(listed["appointments"][0]["status"], "confirmed");
}

#[tokio::test]
async fn test_unknown_tenant_is_not_found() {
    let ctx = TestContext::new().await;

    let resp = ctx.list("nobody", "token-admin").await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.msg(), "Tenant not found");
}

#[tokio::test]
async fn test_unknown_tenant_of_other_caller_is_forbidden() {
    let ctx = TestContext::new().await;

    let resp = ctx.list("nobody", "token-t1").await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Tenant resolution
// ============================================================================

#[tokio::test]
async fn test_binding_resolves_tenant_without_claim() {
    let ctx = TestContext::new().await;

    assert_eq!(ctx.list("t2", "token-bound").await.status, StatusCode::OK);
    assert_eq!(
        ctx.list("t1", "token-bound").await.status,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn test_unbound_user_is_forbidden_by_default() {
    let ctx = TestContext::new().await;

    let resp = ctx.list("t1", "token-unbound").await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_fallback_tenant_applies_when_configured() {
    let ctx = TestContext::with_tenancy(TenancyConfig {
        fallback_tenant: Some(TenantId::new("t3")),
        ..TenancyConfig::default()
    })
    .await;

    assert_eq!(ctx.list("t3", "token-unbound").await.status, StatusCode::OK);
    assert_eq!(
        ctx.list("t1", "token-unbound").await.status,
        StatusCode::FORBIDDEN
    );
    // Bindings still win over the fallback
    assert_eq!(ctx.list("t2", "token-bound").await.status, StatusCode::OK);
}
