//! Appointment route handlers.
//!
//! Each handler authorizes the caller against the tenant in the path before
//! decoding anything else, then delegates to [`AppointmentService`].
//!
//! [`AppointmentService`]: crate::scheduling::AppointmentService

use agenda_core::{Appointment, AppointmentId, BookingExtras, TenantId};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::auth::AuthorizedTenant;
use crate::error::{AppError, Result, set_sentry_user};
use crate::middleware::BearerToken;
use crate::scheduling::{BookingRequest, LifecycleError, RescheduleRequest};
use crate::state::AppState;

/// Appointment as rendered to API clients.
#[derive(Debug, Serialize)]
pub struct AppointmentView {
    pub id: AppointmentId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub date: String,
    pub time: String,
    pub status: &'static str,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "BookingExtras::is_empty")]
    pub extra: BookingExtras,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Appointment> for AppointmentView {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            tenant_id: a.tenant_id,
            name: a.customer_name,
            email: a.customer_email.into_inner(),
            phone: a.customer_phone,
            date: a.date.to_string(),
            time: a.time,
            status: a.status.as_str(),
            confirmed: a.confirmed,
            extra: a.extra,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

/// Envelope for `GET /agendamentos/{tenant}`.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub msg: &'static str,
    pub appointments: Vec<AppointmentView>,
}

/// Envelope for every write.
#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub msg: &'static str,
    pub appointment: AppointmentView,
}

impl WriteResponse {
    fn new(msg: &'static str, appointment: Appointment) -> Json<Self> {
        Json(Self {
            msg,
            appointment: appointment.into(),
        })
    }
}

async fn authorize(state: &AppState, token: &BearerToken, tenant: String) -> Result<AuthorizedTenant> {
    let authorized = state
        .gate()
        .authorize(token.as_deref(), &TenantId::new(tenant))
        .await?;
    set_sentry_user(&authorized.user_id, authorized.tenant_id().as_str());
    Ok(authorized)
}

/// Malformed ids cannot name an existing appointment.
fn parse_id(raw: &str) -> Result<AppointmentId> {
    raw.parse()
        .map_err(|_| AppError::Lifecycle(LifecycleError::NotFound))
}

/// Decode a JSON body; an empty body decodes as `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))
}

/// List live appointments.
pub async fn list(
    State(state): State<AppState>,
    token: BearerToken,
    Path(tenant): Path<String>,
) -> Result<Json<ListResponse>> {
    let authorized = authorize(&state, &token, tenant).await?;
    let appointments = state.appointments().list(authorized.tenant_id()).await?;

    Ok(Json(ListResponse {
        msg: "ok",
        appointments: appointments.into_iter().map(Into::into).collect(),
    }))
}

/// Book an appointment.
pub async fn book(
    State(state): State<AppState>,
    token: BearerToken,
    Path(tenant): Path<String>,
    body: Bytes,
) -> Result<Json<WriteResponse>> {
    let authorized = authorize(&state, &token, tenant).await?;
    let request: BookingRequest = parse_body(&body)?;
    let appointment = state
        .appointments()
        .book(authorized.tenant_id(), request)
        .await?;

    Ok(WriteResponse::new("Appointment booked", appointment))
}

/// Confirm an appointment.
pub async fn confirm(
    State(state): State<AppState>,
    token: BearerToken,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<WriteResponse>> {
    let authorized = authorize(&state, &token, tenant).await?;
    let id = parse_id(&id)?;
    let appointment = state
        .appointments()
        .confirm(authorized.tenant_id(), id)
        .await?;

    Ok(WriteResponse::new("Appointment confirmed", appointment))
}

/// Cancel an appointment.
pub async fn cancel(
    State(state): State<AppState>,
    token: BearerToken,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<WriteResponse>> {
    let authorized = authorize(&state, &token, tenant).await?;
    let id = parse_id(&id)?;
    let appointment = state
        .appointments()
        .cancel(authorized.tenant_id(), id)
        .await?;

    Ok(WriteResponse::new("Appointment cancelled", appointment))
}

/// Reschedule an appointment.
pub async fn reschedule(
    State(state): State<AppState>,
    token: BearerToken,
    Path((tenant, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<WriteResponse>> {
    let authorized = authorize(&state, &token, tenant).await?;
    let id = parse_id(&id)?;
    let request: RescheduleRequest = parse_body(&body)?;
    let appointment = state
        .appointments()
        .reschedule(authorized.tenant_id(), id, request)
        .await?;

    Ok(WriteResponse::new("Appointment rescheduled", appointment))
}
