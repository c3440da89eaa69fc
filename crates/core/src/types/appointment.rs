//! The appointment record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppointmentDate, AppointmentId, AppointmentStatus, Email, TenantId};

/// Free-form booking fields beyond the required ones, keyed by field name.
///
/// The core never interprets them; they are stored with the appointment and
/// projected into the mirror as extra columns.
pub type BookingExtras = BTreeMap<String, String>;

/// The slot an appointment occupies: at most one live appointment per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub tenant_id: TenantId,
    pub date: AppointmentDate,
    /// Tenant-defined slot label, compared by exact equality.
    pub time: String,
}

impl SlotKey {
    #[must_use]
    pub fn new(tenant_id: TenantId, date: AppointmentDate, time: impl Into<String>) -> Self {
        Self {
            tenant_id,
            date,
            time: time.into(),
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} {}", self.tenant_id, self.date, self.time)
    }
}

/// A validated booking, ready to be inserted as a `pending` appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub id: AppointmentId,
    pub tenant_id: TenantId,
    pub customer_name: String,
    pub customer_email: Email,
    pub customer_phone: String,
    pub date: AppointmentDate,
    pub time: String,
    pub extra: BookingExtras,
}

impl NewAppointment {
    /// The slot this booking wants to occupy.
    #[must_use]
    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.tenant_id.clone(), self.date, self.time.clone())
    }

    /// The appointment row this booking becomes once stored at `now`.
    #[must_use]
    pub fn into_appointment(self, now: DateTime<Utc>) -> Appointment {
        Appointment {
            id: self.id,
            tenant_id: self.tenant_id,
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            date: self.date,
            time: self.time,
            status: AppointmentStatus::Pending,
            confirmed: false,
            extra: self.extra,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A booked appointment, as held by the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub tenant_id: TenantId,
    pub customer_name: String,
    pub customer_email: Email,
    pub customer_phone: String,
    pub date: AppointmentDate,
    pub time: String,
    pub status: AppointmentStatus,
    /// Mirrors `status == Confirmed`; kept because the mirror's readers use it.
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BookingExtras,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The slot this appointment occupies (or occupied, if cancelled).
    #[must_use]
    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.tenant_id.clone(), self.date, self.time.clone())
    }

    /// Whether this appointment currently holds its slot.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Set `status` and the lock-step `confirmed` flag together.
    pub const fn set_status(&mut self, status: AppointmentStatus) {
        self.status = status;
        self.confirmed = status.confirmed_flag();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Appointment {
        let now = Utc::now();
        Appointment {
            id: AppointmentId::generate(),
            tenant_id: TenantId::new("t1"),
            customer_name: "Ana".to_owned(),
            customer_email: Email::parse("ANA@X.com").unwrap(),
            customer_phone: "123".to_owned(),
            date: AppointmentDate::parse("2024-05-01").unwrap(),
            time: "09:00".to_owned(),
            status: AppointmentStatus::Pending,
            confirmed: false,
            extra: BookingExtras::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_set_status_keeps_flag_in_lockstep() {
        let mut appointment = sample();
        appointment.set_status(AppointmentStatus::Confirmed);
        assert!(appointment.confirmed);
        appointment.set_status(AppointmentStatus::Cancelled);
        assert!(!appointment.confirmed);
        assert!(!appointment.is_live());
    }

    #[test]
    fn test_slot_display() {
        let appointment = sample();
        assert_eq!(appointment.slot().to_string(), "t1/2024-05-01 09:00");
    }

    #[test]
    fn test_serialize_skips_empty_extra() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("extra").is_none());
        assert_eq!(json["customer_email"], "ana@x.com");
        assert_eq!(json["date"], "2024-05-01");
        assert_eq!(json["status"], "pending");
    }
}
