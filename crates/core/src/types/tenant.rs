//! Tenant configuration.

use serde::{Deserialize, Serialize};

use super::{MirrorDocumentId, TenantId};

/// An isolated customer of the booking service.
///
/// Provisioned out-of-band; the request path only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Spreadsheet document mirroring this tenant's appointments.
    /// `None` disables mirroring for the tenant.
    pub mirror_document_id: Option<MirrorDocumentId>,
}

impl Tenant {
    #[must_use]
    pub const fn new(id: TenantId, mirror_document_id: Option<MirrorDocumentId>) -> Self {
        Self {
            id,
            mirror_document_id,
        }
    }
}
