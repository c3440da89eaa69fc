//! Mirror maintenance commands.
//!
//! # Usage
//!
//! ```bash
//! agenda-cli mirror resync clinic-a
//! ```
//!
//! # Environment Variables
//!
//! - `AGENDA_DATABASE_URL` - `PostgreSQL` connection string
//! - `MIRROR_REFRESH_TOKEN`, `MIRROR_CLIENT_ID`, `MIRROR_CLIENT_SECRET` -
//!   OAuth credentials for the spreadsheet API
//! - `MIRROR_ACCESS_TOKEN` - Fixed access token, when no refresh token is set
//! - `MIRROR_BASE_URL`, `MIRROR_SHEET_NAME`, `MIRROR_TOKEN_URL` - As for the server

use std::sync::Arc;
use std::time::Duration;

use agenda_core::TenantId;
use agenda_server::config::{ConfigError, MirrorConfig};
use agenda_server::db::{AppointmentStore, PgAppointmentStore, PgTenantDirectory, RepositoryError};
use agenda_server::mirror::{MirrorError, MirrorRow, MirrorSynchronizer, SheetsClient};
use thiserror::Error;

use super::{CommandError, connect};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur during mirror operations.
#[derive(Debug, Error)]
pub enum MirrorCommandError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No mirror credentials are set.
    #[error("Mirror is disabled: set MIRROR_REFRESH_TOKEN or MIRROR_ACCESS_TOKEN")]
    Disabled,

    /// The tenant has no mirror document.
    #[error("Tenant {0} has no mirror document")]
    NotConfigured(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    /// Some rows could not be written.
    #[error("{failed} of {total} appointments could not be mirrored")]
    Incomplete { failed: usize, total: usize },
}

/// Re-reflect every appointment of `tenant` into its mirror.
///
/// The sheet is read once for the whole pass. A failed row is logged and the
/// next row is still attempted.
pub async fn resync(tenant: &str) -> Result<(), MirrorCommandError> {
    let config = MirrorConfig::from_env()?.ok_or(MirrorCommandError::Disabled)?;
    let tenant = TenantId::new(tenant.trim());

    let pool = connect().await?;
    let store = PgAppointmentStore::new(pool.clone());
    let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let synchronizer = MirrorSynchronizer::new(
        Some(Arc::new(SheetsClient::new(http, &config))),
        Arc::new(PgTenantDirectory::new(pool)),
    );

    let rows: Vec<_> = store
        .list_all(&tenant)
        .await?
        .iter()
        .map(|appointment| (appointment.id, MirrorRow::from_appointment(appointment)))
        .collect();
    let total = rows.len();
    tracing::info!("Resyncing {} appointments of tenant {}", total, tenant);

    let report = synchronizer
        .reflect_all(&tenant, &rows)
        .await?
        .ok_or_else(|| MirrorCommandError::NotConfigured(tenant.to_string()))?;

    tracing::info!(
        updated = report.updated,
        appended = report.appended,
        failed = report.failed,
        "Resync of tenant {} finished",
        tenant
    );

    if report.failed > 0 {
        return Err(MirrorCommandError::Incomplete {
            failed: report.failed,
            total,
        });
    }

    Ok(())
}
