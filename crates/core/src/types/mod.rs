//! Core types for Agenda.
//!
//! This module provides type-safe wrappers for the booking domain.

pub mod appointment;
pub mod date;
pub mod email;
pub mod id;
pub mod status;
pub mod tenant;

pub use appointment::{Appointment, BookingExtras, NewAppointment, SlotKey};
pub use date::{AppointmentDate, DateError};
pub use email::{Email, EmailError};
pub use id::*;
pub use status::{AppointmentStatus, TransitionError};
pub use tenant::Tenant;
