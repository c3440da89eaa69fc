//! Agenda booking server library.
//!
//! Multi-tenant appointment booking over HTTP, with every write mirrored
//! into a per-tenant spreadsheet. This crate provides the server as a
//! library, allowing it to be tested and reused by the CLI.
//!
//! # Layout
//!
//! - [`auth`] - Tenant authorization gate and identity provider client
//! - [`scheduling`] - Slot availability and the appointment state machine
//! - [`mirror`] - Best-effort spreadsheet mirror
//! - [`db`] - `PostgreSQL` storage
//! - [`routes`] - HTTP surface and JSON envelope

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod mirror;
pub mod routes;
pub mod scheduling;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use routes::app;
pub use state::{AppState, Collaborators};
