//! Agenda Core - Shared domain types.
//!
//! This crate provides the types shared by every Agenda component:
//! - `server` - Multi-tenant appointment booking API
//! - `cli` - Command-line tools for migrations, provisioning and mirror repair
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no HTTP clients. Normalization of customer input and the
//! appointment state machine live here so every store and every surface
//! agrees on them.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, normalized email and date, appointment status
//!   and the appointment record itself

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
