//! HTTP routes.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                  - Liveness
//! GET  /health/ready                            - Readiness (checks the store)
//!
//! # Appointments (bearer token required)
//! GET  /agendamentos/{tenant}                   - List live appointments
//! POST /agendar/{tenant}                        - Book
//! POST /agendamentos/{tenant}/confirmar/{id}    - Confirm
//! POST /agendamentos/{tenant}/cancelar/{id}     - Cancel
//! POST /agendamentos/{tenant}/reagendar/{id}    - Reschedule
//! ```
//!
//! Anything else, including a known path with the wrong method, answers
//! `404` with the JSON envelope.

pub mod appointments;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri},
    routing::{get, post},
};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::error::AppError;
use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Create the appointment routes router.
pub fn appointment_routes() -> Router<AppState> {
    Router::new()
        .route("/agendamentos/{tenant}", get(appointments::list))
        .route("/agendar/{tenant}", post(appointments::book))
        .route(
            "/agendamentos/{tenant}/confirmar/{id}",
            post(appointments::confirm),
        )
        .route(
            "/agendamentos/{tenant}/cancelar/{id}",
            post(appointments::cancel),
        )
        .route(
            "/agendamentos/{tenant}/reagendar/{id}",
            post(appointments::reschedule),
        )
}

/// The complete application: routes, fallback and middleware, with state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(appointment_routes())
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies store connectivity before returning OK.
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_owned())
}
