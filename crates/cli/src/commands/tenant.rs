//! Tenant provisioning commands.
//!
//! # Usage
//!
//! ```bash
//! # Create a tenant without a mirror
//! agenda-cli tenant add clinic-a
//!
//! # Attach (or replace) its mirror document
//! agenda-cli tenant add clinic-a --mirror-document 1AbC...xyz
//!
//! # Bind a user so tokens without a tenant claim still resolve
//! agenda-cli tenant bind-user 6f1c...e2 clinic-a
//! ```

use agenda_core::{MirrorDocumentId, Tenant, TenantId, UserId};
use agenda_server::db::{PgTenantDirectory, RepositoryError, TenantDirectory};
use thiserror::Error;

use super::{CommandError, connect};

/// Errors that can occur during tenant operations.
#[derive(Debug, Error)]
pub enum TenantError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Tenant or user identifier is blank.
    #[error("Identifier must not be blank: {0}")]
    BlankId(&'static str),

    /// The tenant to bind to does not exist.
    #[error("Tenant not found: {0} (create it with `agenda-cli tenant add`)")]
    UnknownTenant(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

fn non_blank(value: &str, what: &'static str) -> Result<String, TenantError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TenantError::BlankId(what));
    }
    Ok(value.to_owned())
}

/// Create a tenant or replace its mirror document.
pub async fn add(tenant: &str, mirror_document: Option<&str>) -> Result<(), TenantError> {
    let tenant = Tenant::new(
        TenantId::new(non_blank(tenant, "tenant")?),
        mirror_document
            .map(|doc| non_blank(doc, "mirror document"))
            .transpose()?
            .map(MirrorDocumentId::new),
    );

    let directory = PgTenantDirectory::new(connect().await?);
    directory.upsert_tenant(&tenant).await?;

    match &tenant.mirror_document_id {
        Some(doc) => tracing::info!("Tenant {} saved, mirrored to {}", tenant.id, doc),
        None => tracing::info!("Tenant {} saved, mirror disabled", tenant.id),
    }
    Ok(())
}

/// Bind a user to a tenant, replacing any previous binding.
pub async fn bind_user(user_id: &str, tenant: &str) -> Result<(), TenantError> {
    let user = UserId::new(non_blank(user_id, "user id")?);
    let tenant = TenantId::new(non_blank(tenant, "tenant")?);

    let directory = PgTenantDirectory::new(connect().await?);
    directory
        .bind_user(&user, &tenant)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => TenantError::UnknownTenant(tenant.to_string()),
            other => TenantError::Repository(other),
        })?;

    tracing::info!("User {} bound to tenant {}", user, tenant);
    Ok(())
}
