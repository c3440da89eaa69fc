//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::{HttpIdentityProvider, IdentityProvider, TenantGate};
use crate::config::{ServerConfig, TenancyConfig};
use crate::db::{AppointmentStore, PgAppointmentStore, PgTenantDirectory, TenantDirectory};
use crate::mirror::{MirrorService, MirrorSynchronizer, SheetsClient};
use crate::scheduling::AppointmentService;

/// The external collaborators the service is wired to.
pub struct Collaborators {
    pub store: Arc<dyn AppointmentStore>,
    pub directory: Arc<dyn TenantDirectory>,
    pub identity: Arc<dyn IdentityProvider>,
    /// `None` disables the mirror for every tenant.
    pub mirror: Option<Arc<dyn MirrorService>>,
}

impl Collaborators {
    /// Production collaborators: `PostgreSQL`, the identity provider and the
    /// spreadsheet API, sharing one HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ServerConfig, pool: PgPool) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("agenda-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mirror = config
            .mirror
            .as_ref()
            .map(|mirror| Arc::new(SheetsClient::new(http.clone(), mirror)) as Arc<dyn MirrorService>);
        if mirror.is_none() {
            tracing::warn!("No mirror credentials set, spreadsheet mirror disabled");
        }

        Ok(Self {
            store: Arc::new(PgAppointmentStore::new(pool.clone())),
            directory: Arc::new(PgTenantDirectory::new(pool)),
            identity: Arc::new(HttpIdentityProvider::new(http, &config.identity)),
            mirror,
        })
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and owns every handle the
/// request path needs; nothing is reached through globals.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    gate: TenantGate,
    appointments: AppointmentService,
    store: Arc<dyn AppointmentStore>,
}

impl AppState {
    /// Wire the gate, lifecycle and mirror onto `collaborators`.
    #[must_use]
    pub fn new(tenancy: TenancyConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            directory,
            identity,
            mirror,
        } = collaborators;

        let gate = TenantGate::new(identity, Arc::clone(&directory), tenancy);
        let synchronizer = MirrorSynchronizer::new(mirror, directory);
        let appointments = AppointmentService::new(Arc::clone(&store), synchronizer);

        Self {
            inner: Arc::new(AppStateInner {
                gate,
                appointments,
                store,
            }),
        }
    }

    /// Get a reference to the tenant authorization gate.
    #[must_use]
    pub fn gate(&self) -> &TenantGate {
        &self.inner.gate
    }

    /// Get a reference to the appointment lifecycle service.
    #[must_use]
    pub fn appointments(&self) -> &AppointmentService {
        &self.inner.appointments
    }

    /// Get a reference to the appointment store.
    #[must_use]
    pub fn store(&self) -> &dyn AppointmentStore {
        self.inner.store.as_ref()
    }
}
