//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Every error renders as the JSON envelope `{"msg": "..."}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::scheduling::LifecycleError;

/// Message returned for every unhandled failure.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Application-level error type for the booking API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authorization failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Appointment operation failed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken | AuthError::Identity(_) => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::Unbound(_) | AuthError::TenantMismatch { .. } => StatusCode::FORBIDDEN,
                AuthError::UnknownTenant(_) => StatusCode::NOT_FOUND,
                AuthError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Lifecycle(err) => match err {
                LifecycleError::Validation(_) | LifecycleError::Conflict(_) => {
                    StatusCode::BAD_REQUEST
                }
                LifecycleError::NotFound => StatusCode::NOT_FOUND,
                LifecycleError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message shown to the client.
    fn client_message(&self) -> String {
        // Don't expose internal error details to clients
        if self.status().is_server_error() {
            return INTERNAL_MESSAGE.to_string();
        }

        match self {
            Self::Auth(AuthError::MissingToken) => "Missing bearer token".to_string(),
            Self::Auth(AuthError::InvalidToken) => "Invalid or expired token".to_string(),
            Self::Auth(AuthError::Identity(_)) => "Token could not be verified".to_string(),
            Self::Auth(AuthError::Unbound(_) | AuthError::TenantMismatch { .. }) => {
                "Access to this tenant is not allowed".to_string()
            }
            Self::Auth(AuthError::UnknownTenant(_)) => "Tenant not found".to_string(),
            Self::Lifecycle(LifecycleError::NotFound) => "Appointment not found".to_string(),
            Self::Lifecycle(err) => err.to_string(),
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::BadRequest(msg) => msg.clone(),
            Self::Auth(_) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else if let Self::Auth(AuthError::Identity(err)) = &self {
            tracing::warn!(error = %err, "Token could not be verified");
            add_breadcrumb("auth", "Identity provider failed", None);
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(json!({ "msg": self.client_message() }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context for the rest of the request.
///
/// Call this after successful authorization to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, tenant: &str) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
        scope.set_tag("tenant", tenant);
    });
}

/// Add a breadcrumb.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of events
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("mirror", "Mirror reflect failed", Some(&[("tenant", "t1")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Warning,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agenda_core::{TenantId, UserId};

    use super::*;
    use crate::auth::IdentityError;
    use crate::db::RepositoryError;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    async fn get_msg(err: AppError) -> String {
        let body = axum::body::to_bytes(err.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["msg"].as_str().unwrap().to_owned()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("route".to_string());
        assert_eq!(err.to_string(), "Not found: route");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AuthError::MissingToken.into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AuthError::InvalidToken.into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AuthError::Identity(IdentityError::Upstream("503".to_string())).into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(
                AuthError::TenantMismatch {
                    resolved: TenantId::new("t1"),
                    requested: TenantId::new("t2"),
                }
                .into()
            ),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AuthError::Unbound(UserId::new("u")).into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(LifecycleError::Validation("x".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(LifecycleError::Conflict("x".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(LifecycleError::NotFound.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::BadRequest("x".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_internal_details_are_not_exposed() {
        let err: AppError =
            LifecycleError::Repository(RepositoryError::DataCorruption("secret".to_string()))
                .into();
        assert_eq!(get_msg(err).await, INTERNAL_MESSAGE);
    }

    #[tokio::test]
    async fn test_client_errors_carry_their_message() {
        let err: AppError = LifecycleError::Validation("missing required fields: name".to_string()).into();
        assert_eq!(get_msg(err).await, "missing required fields: name");
    }
}
