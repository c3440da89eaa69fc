//! Appointment status and its state machine.
//!
//! ```text
//!            confirm
//!   pending ─────────> confirmed
//!      │                  │
//!      │ cancel           │ cancel
//!      └──────> cancelled <┘
//! ```
//!
//! `cancelled` is terminal. Reschedule moves a non-cancelled appointment to a
//! new slot without touching its status.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "appointment_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Booked, awaiting confirmation. The only initial state.
    #[default]
    Pending,
    /// Confirmed by the tenant.
    Confirmed,
    /// Cancelled. Terminal; the slot may be reclaimed by a new booking.
    Cancelled,
}

/// An attempted transition the state machine does not allow.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {action} an appointment that is {from}")]
pub struct TransitionError {
    /// Status the appointment was in.
    pub from: AppointmentStatus,
    /// Verb of the rejected operation (`confirm`, `cancel`, `reschedule`).
    pub action: &'static str,
}

impl AppointmentStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Pending, Self::Confirmed, Self::Cancelled];

    /// Whether the appointment still occupies its slot.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Value of the redundant `confirmed` flag that accompanies this status.
    #[must_use]
    pub const fn confirmed_flag(self) -> bool {
        matches!(self, Self::Confirmed)
    }

    /// Statuses from which `confirm` moves the appointment to `confirmed`.
    #[must_use]
    pub const fn confirmable_from() -> &'static [Self] {
        &[Self::Pending]
    }

    /// Statuses from which `cancel` moves the appointment to `cancelled`.
    #[must_use]
    pub const fn cancellable_from() -> &'static [Self] {
        &[Self::Pending, Self::Confirmed]
    }

    /// Check that `confirm` is legal from this status.
    ///
    /// Confirming an already-confirmed appointment is accepted as a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the appointment is cancelled.
    pub const fn check_confirm(self) -> Result<(), TransitionError> {
        match self {
            Self::Pending | Self::Confirmed => Ok(()),
            Self::Cancelled => Err(TransitionError {
                from: self,
                action: "confirm",
            }),
        }
    }

    /// Check that `reschedule` is legal from this status.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the appointment is cancelled.
    pub const fn check_reschedule(self) -> Result<(), TransitionError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(TransitionError {
                from: self,
                action: "reschedule",
            })
        }
    }

    /// Lower-case wire name, as stored and mirrored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid appointment status: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_pending() {
        assert_eq!(AppointmentStatus::default(), AppointmentStatus::Pending);
    }

    #[test]
    fn test_confirmed_flag_lockstep() {
        for status in AppointmentStatus::ALL {
            assert_eq!(
                status.confirmed_flag(),
                status == AppointmentStatus::Confirmed,
                "{status} flag"
            );
        }
    }

    #[test]
    fn test_only_cancelled_is_not_live() {
        assert!(AppointmentStatus::Pending.is_live());
        assert!(AppointmentStatus::Confirmed.is_live());
        assert!(!AppointmentStatus::Cancelled.is_live());
    }

    #[test]
    fn test_transition_sources() {
        assert_eq!(
            AppointmentStatus::confirmable_from(),
            &[AppointmentStatus::Pending]
        );
        assert!(!AppointmentStatus::cancellable_from().contains(&AppointmentStatus::Cancelled));
    }

    #[test]
    fn test_confirm_of_cancelled_is_rejected() {
        let err = AppointmentStatus::Cancelled.check_confirm().unwrap_err();
        assert_eq!(err.to_string(), "cannot confirm an appointment that is cancelled");
        assert!(AppointmentStatus::Pending.check_confirm().is_ok());
        assert!(AppointmentStatus::Confirmed.check_confirm().is_ok());
    }

    #[test]
    fn test_reschedule_requires_live() {
        assert!(AppointmentStatus::Pending.check_reschedule().is_ok());
        assert!(AppointmentStatus::Confirmed.check_reschedule().is_ok());
        assert!(AppointmentStatus::Cancelled.check_reschedule().is_err());
    }

    #[test]
    fn test_round_trip_names() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.as_str().parse::<AppointmentStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{status}\"")
            );
        }
        assert!("done".parse::<AppointmentStatus>().is_err());
    }
}
