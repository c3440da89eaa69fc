//! Spreadsheet mirror of appointment rows.
//!
//! Each tenant may own one spreadsheet document that receives a copy of every
//! appointment write, for staff who read the schedule outside the API. The
//! mirror is advisory: it may lag or miss writes, and nothing reads it back.
//!
//! # Layout
//!
//! - [`table`] - Header and row model, header union and row upsert rules
//! - [`client`] - [`MirrorService`] and the Google Sheets implementation
//! - [`token`] - Bearer tokens for the spreadsheet API, refreshed as they
//!   expire
//! - [`sync`] - [`MirrorSynchronizer`], which never lets a mirror failure
//!   escape

pub mod client;
mod error;
pub mod sync;
pub mod table;
pub mod token;

pub use client::{MirrorService, SheetsClient};
pub use error::MirrorError;
pub use sync::{MirrorSynchronizer, ReflectOutcome, ResyncReport};
pub use table::{Header, MirrorRow};
pub use token::TokenSource;
