//! In-memory collaborators for tests.
//!
//! Available to this crate's unit tests and, through the `test-utils`
//! feature, to the integration test crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use agenda_core::{
    Appointment, AppointmentDate, AppointmentId, AppointmentStatus, BookingExtras, Email,
    MirrorDocumentId, NewAppointment, SlotKey, Tenant, TenantId, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::auth::{Identity, IdentityError, IdentityProvider};
use crate::db::{AppointmentStore, RepositoryError, TenantDirectory};
use crate::mirror::{MirrorError, MirrorService};

/// A valid booking for `tenant` in the given slot.
///
/// # Panics
///
/// Panics if `date` is not a valid date.
#[must_use]
#[allow(clippy::expect_used)]
pub fn new_booking(tenant: &str, date: &str, time: &str) -> NewAppointment {
    NewAppointment {
        id: AppointmentId::generate(),
        tenant_id: TenantId::new(tenant),
        customer_name: "Ana".to_owned(),
        customer_email: Email::parse("ana@x.com").expect("valid email"),
        customer_phone: "123".to_owned(),
        date: AppointmentDate::parse(date).expect("valid date"),
        time: time.to_owned(),
        extra: BookingExtras::new(),
    }
}

// =============================================================================
// Appointment store
// =============================================================================

/// Appointment store holding rows in memory.
///
/// Enforces the one-live-appointment-per-slot rule the way the partial
/// unique index does, under a single lock.
#[derive(Clone, Default)]
pub struct InMemoryAppointmentStore {
    rows: Arc<Mutex<Vec<Appointment>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryAppointmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn live_in_slot(rows: &[Appointment], slot: &SlotKey, exclude: Option<AppointmentId>) -> usize {
    rows.iter()
        .filter(|a| a.is_live() && &a.slot() == slot && Some(a.id) != exclude)
        .count()
}

fn sorted(mut rows: Vec<Appointment>) -> Vec<Appointment> {
    rows.sort_by(|a, b| (a.date, &a.time, a.created_at).cmp(&(b.date, &b.time, b.created_at)));
    rows
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_available()
    }

    async fn list_live(&self, tenant: &TenantId) -> Result<Vec<Appointment>, RepositoryError> {
        self.check_available()?;
        let rows = self.rows.lock().await;
        Ok(sorted(
            rows.iter()
                .filter(|a| &a.tenant_id == tenant && a.is_live())
                .cloned()
                .collect(),
        ))
    }

    async fn list_all(&self, tenant: &TenantId) -> Result<Vec<Appointment>, RepositoryError> {
        self.check_available()?;
        let rows = self.rows.lock().await;
        Ok(sorted(
            rows.iter()
                .filter(|a| &a.tenant_id == tenant)
                .cloned()
                .collect(),
        ))
    }

    async fn find(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        self.check_available()?;
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|a| &a.tenant_id == tenant && a.id == id)
            .cloned())
    }

    async fn count_live_in_slot(
        &self,
        slot: &SlotKey,
        exclude: Option<AppointmentId>,
    ) -> Result<u64, RepositoryError> {
        self.check_available()?;
        let rows = self.rows.lock().await;
        Ok(live_in_slot(&rows, slot, exclude) as u64)
    }

    async fn book(&self, booking: NewAppointment) -> Result<Appointment, RepositoryError> {
        self.check_available()?;
        let mut rows = self.rows.lock().await;
        let slot = booking.slot();

        if live_in_slot(&rows, &slot, None) > 0 {
            return Err(RepositoryError::Conflict(format!("slot {slot} is taken")));
        }
        rows.retain(|a| a.is_live() || a.slot() != slot);

        let appointment = booking.into_appointment(Utc::now());
        rows.push(appointment.clone());
        Ok(appointment)
    }

    async fn transition(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
    ) -> Result<Option<Appointment>, RepositoryError> {
        self.check_available()?;
        let mut rows = self.rows.lock().await;
        let Some(row) = rows
            .iter_mut()
            .find(|a| &a.tenant_id == tenant && a.id == id && from.contains(&a.status))
        else {
            return Ok(None);
        };

        row.set_status(to);
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn reschedule(
        &self,
        tenant: &TenantId,
        id: AppointmentId,
        date: AppointmentDate,
        time: &str,
    ) -> Result<Option<Appointment>, RepositoryError> {
        self.check_available()?;
        let mut rows = self.rows.lock().await;
        let target = SlotKey::new(tenant.clone(), date, time);
        if live_in_slot(&rows, &target, Some(id)) > 0 {
            return Err(RepositoryError::Conflict(format!("slot {target} is taken")));
        }

        let Some(row) = rows
            .iter_mut()
            .find(|a| &a.tenant_id == tenant && a.id == id && a.is_live())
        else {
            return Ok(None);
        };

        row.date = date;
        row.time = time.to_owned();
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }
}

// =============================================================================
// Tenant directory
// =============================================================================

/// Tenant directory holding tenants and bindings in memory.
#[derive(Clone, Default)]
pub struct InMemoryTenantDirectory {
    tenants: Arc<Mutex<HashMap<TenantId, Tenant>>>,
    bindings: Arc<Mutex<HashMap<UserId, TenantId>>>,
}

impl InMemoryTenantDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision `tenant`, optionally with a mirror document.
    pub async fn add_tenant(&self, tenant: &str, mirror_document: Option<&str>) {
        let tenant = Tenant::new(TenantId::new(tenant), mirror_document.map(MirrorDocumentId::new));
        self.tenants.lock().await.insert(tenant.id.clone(), tenant);
    }

    /// Bind `user` to `tenant` without checking that the tenant exists.
    pub async fn bind(&self, user: &str, tenant: &str) {
        self.bindings
            .lock()
            .await
            .insert(UserId::new(user), TenantId::new(tenant));
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_tenant(&self, tenant: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        Ok(self.tenants.lock().await.get(tenant).cloned())
    }

    async fn tenant_for_user(&self, user: &UserId) -> Result<Option<TenantId>, RepositoryError> {
        Ok(self.bindings.lock().await.get(user).cloned())
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), RepositoryError> {
        self.tenants
            .lock()
            .await
            .insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn bind_user(&self, user: &UserId, tenant: &TenantId) -> Result<(), RepositoryError> {
        if !self.tenants.lock().await.contains_key(tenant) {
            return Err(RepositoryError::NotFound);
        }
        self.bindings
            .lock()
            .await
            .insert(user.clone(), tenant.clone());
        Ok(())
    }
}

// =============================================================================
// Identity provider
// =============================================================================

/// Identity provider backed by a fixed token table.
#[derive(Clone, Default)]
pub struct StaticIdentityProvider {
    users: HashMap<String, Identity>,
    outage: bool,
}

impl StaticIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user`, optionally carrying a tenant claim.
    #[must_use]
    pub fn with_user(mut self, token: &str, user: &str, tenant: Option<&str>) -> Self {
        self.users.insert(
            token.to_owned(),
            Identity {
                user_id: UserId::new(user),
                tenant_id: tenant.map(TenantId::new),
            },
        );
        self
    }

    /// Fail every lookup as if the provider were unreachable.
    #[must_use]
    pub const fn with_outage(mut self) -> Self {
        self.outage = true;
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve_identity(&self, token: &str) -> Result<Identity, IdentityError> {
        if self.outage {
            return Err(IdentityError::Upstream("identity provider unreachable".to_string()));
        }
        self.users
            .get(token)
            .cloned()
            .ok_or(IdentityError::InvalidToken)
    }
}

// =============================================================================
// Mirror
// =============================================================================

/// Spreadsheet mirror holding documents in memory.
#[derive(Clone, Default)]
pub struct InMemoryMirror {
    documents: Arc<Mutex<HashMap<String, Vec<Vec<String>>>>>,
    unreachable: Arc<AtomicBool>,
    yielding: Arc<AtomicBool>,
    rate_limited: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    lists: Arc<AtomicUsize>,
}

impl InMemoryMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the spreadsheet API were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Yield to the scheduler before each call, so concurrent callers
    /// interleave between reads and writes.
    pub fn set_yielding(&self, yielding: bool) {
        self.yielding.store(yielding, Ordering::SeqCst);
    }

    /// Answer the next `count` calls with a rate limit error.
    pub fn rate_limit_next(&self, count: usize) {
        self.rate_limited.store(count, Ordering::SeqCst);
    }

    /// Replace a document's contents.
    pub async fn seed(&self, document: &str, rows: Vec<Vec<String>>) {
        self.documents
            .lock()
            .await
            .insert(document.to_owned(), rows);
    }

    /// Current contents of a document (empty if never written).
    pub async fn rows(&self, document: &str) -> Vec<Vec<String>> {
        self.documents
            .lock()
            .await
            .get(document)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of calls received, failed ones included.
    pub async fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of full document reads received.
    pub async fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<(), MirrorError> {
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MirrorError::Status {
                status: 503,
                body: "unreachable".to_string(),
            });
        }
        if self
            .rate_limited
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MirrorError::RateLimited(0));
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorService for InMemoryMirror {
    async fn list_rows(&self, document: &MirrorDocumentId) -> Result<Vec<Vec<String>>, MirrorError> {
        self.begin().await?;
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows(document.as_str()).await)
    }

    async fn update_row(
        &self,
        document: &MirrorDocumentId,
        index: usize,
        cells: &[String],
    ) -> Result<(), MirrorError> {
        self.begin().await?;
        let mut documents = self.documents.lock().await;
        let rows = documents.entry(document.to_string()).or_default();
        if rows.len() <= index {
            rows.resize(index + 1, Vec::new());
        }
        if let Some(row) = rows.get_mut(index) {
            *row = cells.to_vec();
        }
        Ok(())
    }

    async fn add_row(&self, document: &MirrorDocumentId, cells: &[String]) -> Result<(), MirrorError> {
        self.begin().await?;
        self.documents
            .lock()
            .await
            .entry(document.to_string())
            .or_default()
            .push(cells.to_vec());
        Ok(())
    }
}
