//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! agenda-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `AGENDA_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Migrations live in `crates/server/migrations/` and are embedded at
//! compile time.

use thiserror::Error;

use super::{CommandError, connect};

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run the server's database migrations.
pub async fn run() -> Result<(), MigrationError> {
    let pool = connect().await?;

    tracing::info!("Running agenda migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Agenda migrations complete!");
    Ok(())
}
