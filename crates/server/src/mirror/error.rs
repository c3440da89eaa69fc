//! Mirror error types.

use thiserror::Error;

use crate::db::RepositoryError;

/// Errors that can occur while reflecting a row into the mirror.
///
/// None of these ever reach an HTTP caller.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The spreadsheet API answered with a non-success status.
    #[error("mirror API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The API refused our credentials, even after a token refresh.
    #[error("mirror credentials rejected: {0}")]
    Unauthorized(String),

    /// The tenant's mirror document does not exist or is not shared with us.
    #[error("mirror document not found: {0}")]
    DocumentNotFound(String),

    /// Rate limited by the spreadsheet API.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The document's contents cannot be reconciled with the row.
    #[error("mirror schema error: {0}")]
    Schema(String),

    /// The tenant's mirror configuration could not be read.
    #[error("tenant lookup failed: {0}")]
    Directory(#[from] RepositoryError),
}
