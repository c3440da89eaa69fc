//! Appointment lifecycle: the authoritative write path.
//!
//! ```text
//!            book              confirm
//!   (none) --------> pending ----------> confirmed
//!                       |                    |
//!                       +------ cancel ------+----> cancelled
//! ```
//!
//! Reschedule moves a pending or confirmed appointment to another slot without
//! touching its status. Every successful write is then handed to the
//! [`MirrorSynchronizer`].

use std::sync::Arc;

use agenda_core::{
    Appointment, AppointmentDate, AppointmentId, AppointmentStatus, Email, NewAppointment,
    SlotKey, TenantId, TransitionError,
};
use thiserror::Error;
use tracing::instrument;

use super::availability::is_available;
use super::request::{BookingRequest, RescheduleRequest};
use crate::db::{AppointmentStore, RepositoryError};
use crate::mirror::{MirrorRow, MirrorSynchronizer};

const SLOT_TAKEN: &str = "slot already booked";

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The request is missing a field or carries a malformed one.
    #[error("{0}")]
    Validation(String),

    /// No such appointment for this tenant.
    #[error("appointment not found")]
    NotFound,

    /// The slot is taken, or the transition is not allowed.
    #[error("{0}")]
    Conflict(String),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::Conflict(_) => Self::Conflict(SLOT_TAKEN.to_string()),
            other => Self::Repository(other),
        }
    }
}

impl From<TransitionError> for LifecycleError {
    fn from(err: TransitionError) -> Self {
        Self::Conflict(err.to_string())
    }
}

/// Owns the appointment state machine for every tenant.
#[derive(Clone)]
pub struct AppointmentService {
    store: Arc<dyn AppointmentStore>,
    mirror: MirrorSynchronizer,
}

impl AppointmentService {
    #[must_use]
    pub fn new(store: Arc<dyn AppointmentStore>, mirror: MirrorSynchronizer) -> Self {
        Self { store, mirror }
    }

    /// Live appointments of `tenant`, by date then slot label.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Repository` if the store fails.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn list(&self, tenant: &TenantId) -> Result<Vec<Appointment>, LifecycleError> {
        Ok(self.store.list_live(tenant).await?)
    }

    /// Book a new `pending` appointment.
    ///
    /// Cancelled appointments in the slot are purged first. A live occupant
    /// makes the store refuse the insert.
    ///
    /// # Errors
    ///
    /// - `Validation` for missing or malformed fields
    /// - `Conflict` when the slot already holds a live appointment
    #[instrument(skip(self, request), fields(tenant = %tenant))]
    pub async fn book(
        &self,
        tenant: &TenantId,
        request: BookingRequest,
    ) -> Result<Appointment, LifecycleError> {
        let (fields, extra) = request.into_parts().map_err(LifecycleError::Validation)?;

        let customer_email = Email::parse(&fields.email)
            .map_err(|e| LifecycleError::Validation(format!("invalid email: {e}")))?;
        let date = parse_date(&fields.date)?;

        let booking = NewAppointment {
            id: AppointmentId::generate(),
            tenant_id: tenant.clone(),
            customer_name: fields.name,
            customer_email,
            customer_phone: fields.phone,
            date,
            time: fields.time,
            extra,
        };

        let appointment = self.store.book(booking).await?;
        tracing::info!(
            appointment = %appointment.id,
            slot = %appointment.slot(),
            "Appointment booked"
        );

        self.reflect(&appointment).await;
        Ok(appointment)
    }

    /// Confirm a pending appointment.
    ///
    /// Confirming an already-confirmed appointment succeeds without change.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the appointment does not exist for `tenant`
    /// - `Conflict` if it is cancelled
    #[instrument(skip(self), fields(tenant = %tenant, appointment = %id))]
    pub async fn confirm(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
    ) -> Result<Appointment, LifecycleError> {
        let current = self.find(tenant, id).await?;
        current.status.check_confirm()?;

        let appointment = if current.status == AppointmentStatus::Confirmed {
            current
        } else {
            match self
                .store
                .transition(
                    tenant,
                    id,
                    AppointmentStatus::confirmable_from(),
                    AppointmentStatus::Confirmed,
                )
                .await?
            {
                Some(updated) => updated,
                None => {
                    let latest = self.find(tenant, id).await?;
                    latest.status.check_confirm()?;
                    latest
                }
            }
        };

        tracing::info!(status = %appointment.status, "Appointment confirmed");
        self.reflect(&appointment).await;
        Ok(appointment)
    }

    /// Cancel a pending or confirmed appointment, freeing its slot.
    ///
    /// Cancelling an already-cancelled appointment succeeds without change.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the appointment does not exist for `tenant`.
    #[instrument(skip(self), fields(tenant = %tenant, appointment = %id))]
    pub async fn cancel(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
    ) -> Result<Appointment, LifecycleError> {
        let current = self.find(tenant, id).await?;

        let appointment = if current.status == AppointmentStatus::Cancelled {
            current
        } else {
            match self
                .store
                .transition(
                    tenant,
                    id,
                    AppointmentStatus::cancellable_from(),
                    AppointmentStatus::Cancelled,
                )
                .await?
            {
                Some(updated) => updated,
                None => self.find(tenant, id).await?,
            }
        };

        tracing::info!(status = %appointment.status, "Appointment cancelled");
        self.reflect(&appointment).await;
        Ok(appointment)
    }

    /// Move a live appointment to another slot, keeping its id and status.
    ///
    /// # Errors
    ///
    /// - `Validation` if `newDate` or `newTime` is missing or malformed
    /// - `NotFound` if the appointment does not exist for `tenant`
    /// - `Conflict` if the target slot is taken or the appointment is cancelled
    #[instrument(skip(self, request), fields(tenant = %tenant, appointment = %id))]
    pub async fn reschedule(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
        request: RescheduleRequest,
    ) -> Result<Appointment, LifecycleError> {
        let (date, time) = request.into_parts().map_err(LifecycleError::Validation)?;
        let date = parse_date(&date)?;

        let current = self.find(tenant, id).await?;
        current.status.check_reschedule()?;

        let target = SlotKey::new(tenant.clone(), date, time.as_str());
        if !is_available(self.store.as_ref(), &target, Some(id)).await? {
            return Err(LifecycleError::Conflict(SLOT_TAKEN.to_string()));
        }

        let appointment = match self.store.reschedule(tenant, id, date, &time).await? {
            Some(updated) => updated,
            None => {
                self.find(tenant, id).await?.status.check_reschedule()?;
                return Err(LifecycleError::NotFound);
            }
        };

        tracing::info!(slot = %appointment.slot(), "Appointment rescheduled");
        self.reflect(&appointment).await;
        Ok(appointment)
    }

    async fn find(&self, tenant: &TenantId, id: AppointmentId) -> Result<Appointment, LifecycleError> {
        self.store
            .find(tenant, id)
            .await?
            .ok_or(LifecycleError::NotFound)
    }

    async fn reflect(&self, appointment: &Appointment) {
        self.mirror
            .reflect(
                &appointment.tenant_id,
                appointment.id,
                &MirrorRow::from_appointment(appointment),
            )
            .await;
    }
}

fn parse_date(input: &str) -> Result<AppointmentDate, LifecycleError> {
    AppointmentDate::parse(input).map_err(|e| LifecycleError::Validation(format!("invalid date: {e}")))
}
