//! `PostgreSQL` tenant directory.

use agenda_core::{MirrorDocumentId, Tenant, TenantId, UserId};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use super::{RepositoryError, TenantDirectory};

/// Internal row type for database queries.
#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: String,
    mirror_document_id: Option<String>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: TenantId::new(row.id),
            mirror_document_id: row
                .mirror_document_id
                .filter(|doc| !doc.trim().is_empty())
                .map(MirrorDocumentId::new),
        }
    }
}

/// Tenant directory backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    /// Create a new tenant directory.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn find_tenant(&self, tenant: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query_as::<_, TenantRow>(
            r"
            SELECT id, mirror_document_id
            FROM tenants
            WHERE id = $1
            ",
        )
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Tenant::from))
    }

    #[instrument(skip(self), fields(user = %user))]
    async fn tenant_for_user(&self, user: &UserId) -> Result<Option<TenantId>, RepositoryError> {
        let tenant: Option<String> = sqlx::query_scalar(
            r"
            SELECT tenant_id
            FROM user_tenants
            WHERE user_id = $1
            ",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant.map(TenantId::new))
    }

    #[instrument(skip(self, tenant), fields(tenant = %tenant.id))]
    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO tenants (id, mirror_document_id)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE
            SET mirror_document_id = EXCLUDED.mirror_document_id, updated_at = NOW()
            ",
        )
        .bind(tenant.id.as_str())
        .bind(tenant.mirror_document_id.as_ref().map(MirrorDocumentId::as_str))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(user = %user, tenant = %tenant))]
    async fn bind_user(&self, user: &UserId, tenant: &TenantId) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO user_tenants (user_id, tenant_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET tenant_id = EXCLUDED.tenant_id, updated_at = NOW()
            ",
        )
        .bind(user.as_str())
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, "user already bound"))?;

        Ok(())
    }
}
