//! Integration tests for Agenda.
//!
//! The full router is built from [`agenda_server::app`] and driven in
//! process with `tower::ServiceExt::oneshot`; the database, identity
//! provider and spreadsheet are the in-memory collaborators from
//! `agenda_server::testing`.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p agenda-integration-tests
//! ```
//!
//! The `postgres_store` tests exercise the real store. They are ignored by
//! default; run them against a database they may migrate:
//!
//! ```bash
//! AGENDA_TEST_DATABASE_URL=postgres://localhost/agenda_test \
//!     cargo test -p agenda-integration-tests -- --ignored
//! ```
//!
//! # Fixture
//!
//! [`TestContext::new`] provisions:
//!
//! | Tenant  | Mirror document |
//! |---------|-----------------|
//! | `t1`    | `doc-t1`        |
//! | `t2`    | `doc-t2`        |
//! | `t3`    | none            |
//! | `admin` | none            |
//!
//! and accepts these bearer tokens:
//!
//! | Token           | User      | Tenant                          |
//! |-----------------|-----------|---------------------------------|
//! | `token-t1`      | `user-t1` | claim `t1`                      |
//! | `token-t2`      | `user-t2` | claim `t2`                      |
//! | `token-t3`      | `user-t3` | claim `t3`                      |
//! | `token-admin`   | `root`    | claim `admin`                   |
//! | `token-bound`   | `bound`   | no claim, bound to `t2`         |
//! | `token-unbound` | `drifter` | no claim, no binding            |

use agenda_server::config::TenancyConfig;
use agenda_server::testing::{
    InMemoryAppointmentStore, InMemoryMirror, InMemoryTenantDirectory, StaticIdentityProvider,
};
use agenda_server::{AppState, Collaborators};
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// A router wired to in-memory collaborators, plus handles to inspect them.
pub struct TestContext {
    pub app: Router,
    pub store: InMemoryAppointmentStore,
    pub directory: InMemoryTenantDirectory,
    pub mirror: InMemoryMirror,
}

impl TestContext {
    /// Fixture with the default tenancy policy (admin tenant `admin`, no
    /// fallback).
    pub async fn new() -> Self {
        Self::with_tenancy(TenancyConfig::default()).await
    }

    /// Fixture with a custom tenancy policy.
    pub async fn with_tenancy(tenancy: TenancyConfig) -> Self {
        Self::build(tenancy, fixture_identities()).await
    }

    /// Fixture whose identity provider is unreachable.
    pub async fn with_identity_outage() -> Self {
        Self::build(TenancyConfig::default(), fixture_identities().with_outage()).await
    }

    async fn build(tenancy: TenancyConfig, identity: StaticIdentityProvider) -> Self {
        let store = InMemoryAppointmentStore::new();
        let directory = InMemoryTenantDirectory::new();
        let mirror = InMemoryMirror::new();

        directory.add_tenant("t1", Some("doc-t1")).await;
        directory.add_tenant("t2", Some("doc-t2")).await;
        directory.add_tenant("t3", None).await;
        directory.add_tenant("admin", None).await;
        directory.bind("bound", "t2").await;

        let state = AppState::new(
            tenancy,
            Collaborators {
                store: Arc::new(store.clone()),
                directory: Arc::new(directory.clone()),
                identity: Arc::new(identity),
                mirror: Some(Arc::new(mirror.clone())),
            },
        );

        Self {
            app: agenda_server::app(state),
            store,
            directory,
            mirror,
        }
    }

    /// Send a request with an optional bearer token and JSON body.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let body = body.map(|json| json.to_string()).unwrap_or_default();
        self.send_raw(method, path, token, body).await
    }

    /// Send a request with a raw body.
    #[allow(clippy::missing_panics_doc)]
    pub async fn send_raw(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: impl Into<String>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(Body::from(body.into()))
            .expect("Failed to build request");

        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn list(&self, tenant: &str, token: &str) -> TestResponse {
        self.send(Method::GET, &format!("/agendamentos/{tenant}"), Some(token), None)
            .await
    }

    pub async fn book(&self, tenant: &str, token: &str, body: Value) -> TestResponse {
        self.send(Method::POST, &format!("/agendar/{tenant}"), Some(token), Some(body))
            .await
    }

    /// `op` is one of `confirmar`, `cancelar` or `reagendar`.
    pub async fn act(
        &self,
        op: &str,
        tenant: &str,
        id: &str,
        token: &str,
        body: Option<Value>,
    ) -> TestResponse {
        self.send(
            Method::POST,
            &format!("/agendamentos/{tenant}/{op}/{id}"),
            Some(token),
            body,
        )
        .await
    }

    /// Book a valid appointment and return its id.
    pub async fn book_ok(&self, tenant: &str, token: &str, date: &str, time: &str) -> String {
        let response = self.book(tenant, token, booking(date, time)).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text);
        response.json()["appointment"]["id"]
            .as_str()
            .expect("Booked appointment has an id")
            .to_owned()
    }
}

fn fixture_identities() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_user("token-t1", "user-t1", Some("t1"))
        .with_user("token-t2", "user-t2", Some("t2"))
        .with_user("token-t3", "user-t3", Some("t3"))
        .with_user("token-admin", "root", Some("admin"))
        .with_user("token-bound", "bound", None)
        .with_user("token-unbound", "drifter", None)
}

/// A complete booking body for Ana in the given slot.
pub fn booking(date: &str, time: &str) -> Value {
    serde_json::json!({
        "name": "Ana",
        "email": "ana@x.com",
        "phone": "123",
        "date": date,
        "time": time,
    })
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl TestResponse {
    /// The body parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the body is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).expect("Response body is JSON")
    }

    /// The `msg` field of the JSON envelope.
    pub fn msg(&self) -> String {
        self.json()["msg"].as_str().unwrap_or_default().to_owned()
    }
}
