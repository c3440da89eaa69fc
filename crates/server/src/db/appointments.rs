//! `PostgreSQL` appointment store.
//!
//! Every query filters by `tenant_id`. Status filters compare on
//! `status::text` so status lists can be bound as plain text arrays.

use agenda_core::{
    Appointment, AppointmentDate, AppointmentId, AppointmentStatus, BookingExtras, Email,
    NewAppointment, SlotKey, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{AppointmentStore, RepositoryError};

const SLOT_TAKEN: &str = "slot already has a live appointment";

/// Internal row type for database queries.
#[derive(Debug, sqlx::FromRow)]
struct AppointmentRow {
    id: Uuid,
    tenant_id: String,
    customer_name: String,
    customer_email: String,
    customer_phone: String,
    slot_date: NaiveDate,
    slot_time: String,
    status: AppointmentStatus,
    confirmed: bool,
    extra: Json<BookingExtras>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = RepositoryError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let customer_email = Email::parse(&row.customer_email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        if row.confirmed != row.status.confirmed_flag() {
            return Err(RepositoryError::DataCorruption(format!(
                "appointment {} has status {} but confirmed={}",
                row.id, row.status, row.confirmed
            )));
        }

        Ok(Self {
            id: AppointmentId::from_uuid(row.id),
            tenant_id: TenantId::new(row.tenant_id),
            customer_name: row.customer_name,
            customer_email,
            customer_phone: row.customer_phone,
            date: AppointmentDate::from_naive(row.slot_date),
            time: row.slot_time,
            status: row.status,
            confirmed: row.confirmed,
            extra: row.extra.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_appointments(rows: Vec<AppointmentRow>) -> Result<Vec<Appointment>, RepositoryError> {
    rows.into_iter().map(Appointment::try_from).collect()
}

fn status_names(statuses: &[AppointmentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_owned()).collect()
}

/// Appointment store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgAppointmentStore {
    pool: PgPool,
}

impl PgAppointmentStore {
    /// Create a new appointment store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn list_live(&self, tenant: &TenantId) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r#"
            SELECT id, tenant_id, customer_name, customer_email, customer_phone,
                   slot_date, slot_time, status, confirmed, extra, created_at, updated_at
            FROM appointments
            WHERE tenant_id = $1 AND status <> 'cancelled'
            ORDER BY slot_date ASC, slot_time COLLATE "C" ASC
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_appointments(rows)
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn list_all(&self, tenant: &TenantId) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r#"
            SELECT id, tenant_id, customer_name, customer_email, customer_phone,
                   slot_date, slot_time, status, confirmed, extra, created_at, updated_at
            FROM appointments
            WHERE tenant_id = $1
            ORDER BY slot_date ASC, slot_time COLLATE "C" ASC, created_at ASC
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_appointments(rows)
    }

    #[instrument(skip(self), fields(tenant = %tenant, appointment = %id))]
    async fn find(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r"
            SELECT id, tenant_id, customer_name, customer_email, customer_phone,
                   slot_date, slot_time, status, confirmed, extra, created_at, updated_at
            FROM appointments
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant.as_str())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Appointment::try_from).transpose()
    }

    #[instrument(skip(self), fields(slot = %slot))]
    async fn count_live_in_slot(
        &self,
        slot: &SlotKey,
        exclude: Option<AppointmentId>,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM appointments
            WHERE tenant_id = $1
              AND slot_date = $2
              AND slot_time = $3
              AND status <> 'cancelled'
              AND ($4::uuid IS NULL OR id <> $4)
            ",
        )
        .bind(slot.tenant_id.as_str())
        .bind(slot.date.as_naive())
        .bind(&slot.time)
        .bind(exclude.map(|id| *id.as_uuid()))
        .fetch_one(&self.pool)
        .await?;

        u64::try_from(count)
            .map_err(|_| RepositoryError::DataCorruption(format!("negative count {count}")))
    }

    #[instrument(skip(self, booking), fields(tenant = %booking.tenant_id, appointment = %booking.id))]
    async fn book(&self, booking: NewAppointment) -> Result<Appointment, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let purged = sqlx::query(
            r"
            DELETE FROM appointments
            WHERE tenant_id = $1 AND slot_date = $2 AND slot_time = $3 AND status = 'cancelled'
            ",
        )
        .bind(booking.tenant_id.as_str())
        .bind(booking.date.as_naive())
        .bind(&booking.time)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if purged > 0 {
            debug!(purged, "Reclaimed slot from cancelled appointments");
        }

        let row = sqlx::query_as::<_, AppointmentRow>(
            r"
            INSERT INTO appointments (
                id, tenant_id, customer_name, customer_email, customer_phone,
                slot_date, slot_time, status, confirmed, extra
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', FALSE, $8)
            RETURNING id, tenant_id, customer_name, customer_email, customer_phone,
                      slot_date, slot_time, status, confirmed, extra, created_at, updated_at
            ",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.tenant_id.as_str())
        .bind(&booking.customer_name)
        .bind(booking.customer_email.as_str())
        .bind(&booking.customer_phone)
        .bind(booking.date.as_naive())
        .bind(&booking.time)
        .bind(Json(&booking.extra))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_write(e, SLOT_TAKEN))?;

        tx.commit().await?;

        row.try_into()
    }

    #[instrument(skip(self, from), fields(tenant = %tenant, appointment = %id, to = %to))]
    async fn transition(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r"
            UPDATE appointments
            SET status = $4, confirmed = $5, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND status::text = ANY($3)
            RETURNING id, tenant_id, customer_name, customer_email, customer_phone,
                      slot_date, slot_time, status, confirmed, extra, created_at, updated_at
            ",
        )
        .bind(tenant.as_str())
        .bind(id.as_uuid())
        .bind(status_names(from))
        .bind(to)
        .bind(to.confirmed_flag())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, SLOT_TAKEN))?;

        row.map(Appointment::try_from).transpose()
    }

    #[instrument(skip(self), fields(tenant = %tenant, appointment = %id, date = %date))]
    async fn reschedule(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
        date: AppointmentDate,
        time: &str,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r"
            UPDATE appointments
            SET slot_date = $3, slot_time = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND status <> 'cancelled'
            RETURNING id, tenant_id, customer_name, customer_email, customer_phone,
                      slot_date, slot_time, status, confirmed, extra, created_at, updated_at
            ",
        )
        .bind(tenant.as_str())
        .bind(id.as_uuid())
        .bind(date.as_naive())
        .bind(time)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, SLOT_TAKEN))?;

        row.map(Appointment::try_from).transpose()
    }
}
