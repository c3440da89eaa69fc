//! Tenant authorization gate.
//!
//! Every appointment operation passes through [`TenantGate::authorize`]
//! before touching storage. The gate turns a bearer token into the tenant the
//! caller belongs to and rejects requests aimed at any other tenant.
//!
//! # Tenant resolution
//!
//! 1. The tenant claim carried by the token
//! 2. The caller's row in `user_tenants`
//! 3. The configured fallback tenant, only when `AUTH_FALLBACK_TENANT` is set
//!
//! Without a fallback, a caller that resolves to no tenant is refused with
//! `Forbidden`.

pub mod identity;

use std::sync::Arc;

use agenda_core::{Tenant, TenantId, UserId};
use thiserror::Error;
use tracing::instrument;

pub use identity::{HttpIdentityProvider, Identity, IdentityError, IdentityProvider};

use crate::config::TenancyConfig;
use crate::db::{RepositoryError, TenantDirectory};

/// Errors raised while authorizing a request.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer token was supplied.
    #[error("missing bearer token")]
    MissingToken,

    /// The identity provider rejected the token.
    #[error("invalid or expired token")]
    InvalidToken,

    /// The caller could not be mapped to any tenant.
    #[error("user {0} is not bound to a tenant")]
    Unbound(UserId),

    /// The caller belongs to another tenant.
    #[error("tenant {resolved} may not act on tenant {requested}")]
    TenantMismatch {
        resolved: TenantId,
        requested: TenantId,
    },

    /// The requested tenant is not provisioned.
    #[error("unknown tenant {0}")]
    UnknownTenant(TenantId),

    /// The identity provider could not be reached or misbehaved.
    #[error("identity provider error: {0}")]
    Identity(IdentityError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidToken => Self::InvalidToken,
            other => Self::Identity(other),
        }
    }
}

/// A request that passed the gate.
#[derive(Debug, Clone)]
pub struct AuthorizedTenant {
    /// The tenant the request operates on.
    pub tenant: Tenant,
    /// The verified caller.
    pub user_id: UserId,
    /// The tenant the caller resolved to; differs from `tenant.id` only
    /// for the admin tenant.
    pub acting_as: TenantId,
}

impl AuthorizedTenant {
    #[must_use]
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }
}

/// Resolves callers into tenants and enforces tenant isolation.
#[derive(Clone)]
pub struct TenantGate {
    identity: Arc<dyn IdentityProvider>,
    directory: Arc<dyn TenantDirectory>,
    policy: TenancyConfig,
}

impl TenantGate {
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        directory: Arc<dyn TenantDirectory>,
        policy: TenancyConfig,
    ) -> Self {
        Self {
            identity,
            directory,
            policy,
        }
    }

    /// Authorize `token` to operate on `requested`.
    ///
    /// # Errors
    ///
    /// - `MissingToken` / `InvalidToken` when the caller is not authenticated
    /// - `Unbound` / `TenantMismatch` when the caller may not act on `requested`
    /// - `UnknownTenant` when `requested` is not provisioned
    /// - `Identity` / `Repository` when a collaborator fails
    #[instrument(skip(self, token), fields(requested = %requested))]
    pub async fn authorize(
        &self,
        token: Option<&str>,
        requested: &TenantId,
    ) -> Result<AuthorizedTenant, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let identity = self.identity.resolve_identity(token).await?;
        let acting_as = self.resolve_tenant(&identity).await?;

        if &acting_as != requested && acting_as != self.policy.admin_tenant {
            tracing::warn!(
                user_id = %identity.user_id,
                resolved = %acting_as,
                "Cross-tenant request refused"
            );
            return Err(AuthError::TenantMismatch {
                resolved: acting_as,
                requested: requested.clone(),
            });
        }

        let tenant = self
            .directory
            .find_tenant(requested)
            .await?
            .ok_or_else(|| AuthError::UnknownTenant(requested.clone()))?;

        Ok(AuthorizedTenant {
            tenant,
            user_id: identity.user_id,
            acting_as,
        })
    }

    async fn resolve_tenant(&self, identity: &Identity) -> Result<TenantId, AuthError> {
        if let Some(tenant) = &identity.tenant_id {
            return Ok(tenant.clone());
        }

        if let Some(tenant) = self.directory.tenant_for_user(&identity.user_id).await? {
            return Ok(tenant);
        }

        match &self.policy.fallback_tenant {
            Some(fallback) => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    fallback = %fallback,
                    "User has no tenant binding, using fallback tenant"
                );
                Ok(fallback.clone())
            }
            None => Err(AuthError::Unbound(identity.user_id.clone())),
        }
    }
}
