//! Authoritative storage for appointments and tenant configuration.
//!
//! # Database: `agenda`
//!
//! ## Tables
//!
//! - `tenants` - Provisioned tenants and their mirror document
//! - `user_tenants` - User-to-tenant bindings used when token claims lack a tenant
//! - `appointments` - Appointment rows; a partial unique index on
//!   `(tenant_id, slot_date, slot_time) WHERE status <> 'cancelled'` is the
//!   guarantee that a slot never holds two live appointments
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p agenda-cli -- migrate
//! ```
//!
//! The request path talks to storage through the [`AppointmentStore`] and
//! [`TenantDirectory`] traits so handlers never see a concrete pool.

pub mod appointments;
pub mod tenants;

use std::time::Duration;

use agenda_core::{
    Appointment, AppointmentDate, AppointmentId, AppointmentStatus, NewAppointment, SlotKey,
    Tenant, TenantId, UserId,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use appointments::PgAppointmentStore;
pub use tenants::PgTenantDirectory;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a second live appointment in one slot).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map a sqlx error, turning constraint violations into domain variants.
    pub(crate) fn from_write(e: sqlx::Error, conflict: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return Self::Conflict(conflict.to_owned());
            }
            if db_err.is_foreign_key_violation() {
                return Self::NotFound;
            }
        }
        Self::Database(e)
    }
}

/// Appointment persistence, always scoped by tenant.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Live appointments of a tenant ordered by date, then slot label.
    async fn list_live(&self, tenant: &TenantId) -> Result<Vec<Appointment>, RepositoryError>;

    /// Every appointment of a tenant, cancelled ones included.
    async fn list_all(&self, tenant: &TenantId) -> Result<Vec<Appointment>, RepositoryError>;

    /// Fetch one appointment, `None` if it does not exist for this tenant.
    async fn find(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError>;

    /// Number of live appointments in `slot`, ignoring `exclude`.
    async fn count_live_in_slot(
        &self,
        slot: &SlotKey,
        exclude: Option<AppointmentId>,
    ) -> Result<u64, RepositoryError>;

    /// Purge cancelled rows in the booking's slot and insert it as `pending`,
    /// atomically.
    ///
    /// Returns `RepositoryError::Conflict` if the slot already holds a live
    /// appointment.
    async fn book(&self, booking: NewAppointment) -> Result<Appointment, RepositoryError>;

    /// Move an appointment to `to` if its current status is one of `from`.
    ///
    /// Returns `None` when no row matched (missing, or in another status).
    async fn transition(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
    ) -> Result<Option<Appointment>, RepositoryError>;

    /// Move a live appointment to a new slot, keeping its status.
    ///
    /// Returns `None` when no live row matched, `RepositoryError::Conflict` if
    /// the target slot is taken.
    async fn reschedule(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
        date: AppointmentDate,
        time: &str,
    ) -> Result<Option<Appointment>, RepositoryError>;
}

/// Tenant configuration and user bindings.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Look up a provisioned tenant.
    async fn find_tenant(&self, tenant: &TenantId) -> Result<Option<Tenant>, RepositoryError>;

    /// Tenant bound to a user, if any.
    async fn tenant_for_user(&self, user: &UserId) -> Result<Option<TenantId>, RepositoryError>;

    /// Create a tenant or replace its mirror document.
    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), RepositoryError>;

    /// Bind a user to a tenant, replacing any previous binding.
    ///
    /// Returns `RepositoryError::NotFound` if the tenant is not provisioned.
    async fn bind_user(&self, user: &UserId, tenant: &TenantId) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
