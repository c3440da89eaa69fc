//! Slot availability and the appointment state machine.

pub mod availability;
pub mod lifecycle;
pub mod request;

pub use availability::is_available;
pub use lifecycle::{AppointmentService, LifecycleError};
pub use request::{BookingRequest, FieldValue, RescheduleRequest};
