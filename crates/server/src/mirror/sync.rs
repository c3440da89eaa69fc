//! Best-effort reflection of appointment writes into the mirror.

use std::sync::Arc;
use std::time::Duration;

use agenda_core::{AppointmentId, MirrorDocumentId, TenantId};
use async_trait::async_trait;
use tracing::instrument;

use super::table::{Header, ID_COLUMN, MirrorRow};
use super::{MirrorError, MirrorService};
use crate::db::TenantDirectory;
use crate::error::add_breadcrumb;

/// Header writes attempted before a reflect gives up on a contended sheet.
const MAX_HEADER_WRITES: usize = 5;

/// Retries of a single call after the spreadsheet API asks us to slow down.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Upper bound on one `Retry-After` wait.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// What a successful reflect did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectOutcome {
    /// Mirroring is switched off for the whole service.
    Disabled,
    /// The tenant has no mirror document.
    NotConfigured,
    /// An existing row was overwritten (index counts the header as 0).
    Updated(usize),
    /// A new row was appended.
    Appended,
}

/// Totals of a [`MirrorSynchronizer::reflect_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub updated: usize,
    pub appended: usize,
    /// Rows whose write failed; the pass carried on past them.
    pub failed: usize,
}

/// Where a tenant's rows go, if anywhere.
enum Target<'a> {
    Skip(ReflectOutcome),
    Document(&'a dyn MirrorService, MirrorDocumentId),
}

/// Projects authoritative writes into each tenant's mirror document.
#[derive(Clone)]
pub struct MirrorSynchronizer {
    service: Option<Arc<dyn MirrorService>>,
    directory: Arc<dyn TenantDirectory>,
}

impl MirrorSynchronizer {
    /// Create a synchronizer. `service = None` turns every reflect into a no-op.
    #[must_use]
    pub fn new(service: Option<Arc<dyn MirrorService>>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self { service, directory }
    }

    /// Reflect `row` into the tenant's mirror, logging any failure.
    pub async fn reflect(&self, tenant: &TenantId, appointment_id: AppointmentId, row: &MirrorRow) {
        match self.try_reflect(tenant, appointment_id, row).await {
            Ok(outcome) => {
                tracing::debug!(
                    tenant = %tenant,
                    appointment = %appointment_id,
                    outcome = ?outcome,
                    "Mirror reflected"
                );
            }
            Err(e) => {
                tracing::warn!(
                    tenant = %tenant,
                    appointment = %appointment_id,
                    error = %e,
                    "Mirror reflect failed, authoritative write kept"
                );
                add_breadcrumb(
                    "mirror",
                    "Mirror reflect failed",
                    Some(&[
                        ("tenant", tenant.as_str()),
                        ("appointment", &appointment_id.to_string()),
                    ]),
                );
            }
        }
    }

    /// Reflect `row`, surfacing failures to the caller.
    ///
    /// # Errors
    ///
    /// Returns `MirrorError` if the tenant lookup or any mirror call fails,
    /// or if concurrent writers keep the header from settling.
    #[instrument(skip(self, row), fields(tenant = %tenant, appointment = %appointment_id))]
    pub async fn try_reflect(
        &self,
        tenant: &TenantId,
        appointment_id: AppointmentId,
        row: &MirrorRow,
    ) -> Result<ReflectOutcome, MirrorError> {
        let (service, document) = match self.target(tenant).await? {
            Target::Skip(outcome) => return Ok(outcome),
            Target::Document(service, document) => (service, document),
        };

        let wanted = Header::default().union(row);
        let (header, mut rows) = settle_header(service, &document, &wanted).await?;
        write_row(service, &document, &header, &mut rows, appointment_id, row).await
    }

    /// Write every row of a tenant in one pass over its mirror.
    ///
    /// The document is listed once and the header extended once for the
    /// whole batch. Rate-limited calls are retried after the delay the API
    /// asks for. Returns `None` when the tenant has nothing to write to.
    ///
    /// # Errors
    ///
    /// Returns `MirrorError` if the document cannot be read or its header
    /// cannot be settled. Failures of individual row writes are counted in
    /// the report instead.
    #[instrument(skip(self, rows), fields(tenant = %tenant, rows = rows.len()))]
    pub async fn reflect_all(
        &self,
        tenant: &TenantId,
        rows: &[(AppointmentId, MirrorRow)],
    ) -> Result<Option<ResyncReport>, MirrorError> {
        let (service, document) = match self.target(tenant).await? {
            Target::Skip(_) => return Ok(None),
            Target::Document(service, document) => (service, document),
        };
        let service = Patient { inner: service };

        let wanted = rows
            .iter()
            .fold(Header::default(), |header, (_, row)| header.union(row));
        let (header, mut sheet) = settle_header(&service, &document, &wanted).await?;

        let mut report = ResyncReport::default();
        for (id, row) in rows {
            match write_row(&service, &document, &header, &mut sheet, *id, row).await {
                Ok(ReflectOutcome::Updated(_)) => report.updated += 1,
                Ok(ReflectOutcome::Appended) => report.appended += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(appointment = %id, error = %e, "Failed to mirror appointment");
                }
            }
        }

        Ok(Some(report))
    }

    async fn target(&self, tenant: &TenantId) -> Result<Target<'_>, MirrorError> {
        let Some(service) = &self.service else {
            return Ok(Target::Skip(ReflectOutcome::Disabled));
        };

        let document = self
            .directory
            .find_tenant(tenant)
            .await?
            .and_then(|t| t.mirror_document_id);

        Ok(document.map_or(Target::Skip(ReflectOutcome::NotConfigured), |document| {
            Target::Document(service.as_ref(), document)
        }))
    }
}

fn header_of(rows: &[Vec<String>]) -> Header {
    Header::from_cells(rows.first().map_or(&[][..], Vec::as_slice))
}

/// Make the document's header hold every column of `wanted` and return it
/// as read back, with the rows read alongside it.
///
/// The values API has no conditional write, so a concurrent writer can
/// replace a header we just wrote. Each write merges every column seen so
/// far into the latest header, and the header is only trusted once a read
/// shows it.
async fn settle_header(
    service: &dyn MirrorService,
    document: &MirrorDocumentId,
    wanted: &Header,
) -> Result<(Header, Vec<Vec<String>>), MirrorError> {
    let mut rows = service.list_rows(document).await?;
    let mut header = header_of(&rows);
    let mut seen = wanted.clone();
    let mut writes = 0;

    loop {
        seen = seen.merge(&header);
        if header.includes(&seen) {
            break;
        }
        if writes == MAX_HEADER_WRITES {
            return Err(MirrorError::Schema(format!(
                "header did not settle after {MAX_HEADER_WRITES} writes"
            )));
        }
        writes += 1;

        let extended = header.merge(&seen);
        tracing::info!(
            document = %document,
            added = extended.columns().len() - header.columns().len(),
            attempt = writes,
            "Extending mirror header"
        );
        service.update_row(document, 0, extended.columns()).await?;

        rows = service.list_rows(document).await?;
        header = header_of(&rows);
    }

    if header.position(ID_COLUMN).is_none() {
        return Err(MirrorError::Schema("header has no id column".to_string()));
    }

    Ok((header, rows))
}

/// Overwrite the row keyed by `id`, or append one, keeping `rows` in step
/// with what was written.
async fn write_row(
    service: &dyn MirrorService,
    document: &MirrorDocumentId,
    header: &Header,
    rows: &mut Vec<Vec<String>>,
    id: AppointmentId,
    row: &MirrorRow,
) -> Result<ReflectOutcome, MirrorError> {
    if let Some(index) = header.find_row(rows, &id.to_string())
        && let Some(current) = rows.get_mut(index)
    {
        let cells = header.overlay(current, row);
        service.update_row(document, index, &cells).await?;
        *current = cells;
        return Ok(ReflectOutcome::Updated(index));
    }

    let cells = header.layout(row);
    service.add_row(document, &cells).await?;
    rows.push(cells);
    Ok(ReflectOutcome::Appended)
}

/// A [`MirrorService`] that waits out rate limits instead of failing.
struct Patient<'a> {
    inner: &'a dyn MirrorService,
}

impl Patient<'_> {
    async fn backoff(attempt: u32, retry_after: u64) {
        let delay = Duration::from_secs(retry_after).min(MAX_BACKOFF);
        tracing::warn!(
            attempt,
            delay_secs = delay.as_secs(),
            "Mirror rate limited, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Retry `$call` while it fails with `RateLimited`, up to the retry limit.
macro_rules! patiently {
    ($call:expr) => {{
        let mut attempt = 0;
        loop {
            match $call.await {
                Err(MirrorError::RateLimited(secs)) if attempt < MAX_RATE_LIMIT_RETRIES => {
                    attempt += 1;
                    Patient::backoff(attempt, secs).await;
                }
                other => break other,
            }
        }
    }};
}

#[async_trait]
impl MirrorService for Patient<'_> {
    async fn list_rows(&self, document: &MirrorDocumentId) -> Result<Vec<Vec<String>>, MirrorError> {
        patiently!(self.inner.list_rows(document))
    }

    async fn update_row(
        &self,
        document: &MirrorDocumentId,
        index: usize,
        cells: &[String],
    ) -> Result<(), MirrorError> {
        patiently!(self.inner.update_row(document, index, cells))
    }

    async fn add_row(&self, document: &MirrorDocumentId, cells: &[String]) -> Result<(), MirrorError> {
        patiently!(self.inner.add_row(document, cells))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryMirror, InMemoryTenantDirectory};

    async fn setup(document: Option<&str>) -> (MirrorSynchronizer, InMemoryMirror) {
        let directory = InMemoryTenantDirectory::new();
        directory.add_tenant("t1", document).await;
        let mirror = InMemoryMirror::new();
        let sync = MirrorSynchronizer::new(Some(Arc::new(mirror.clone())), Arc::new(directory));
        (sync, mirror)
    }

    fn row(id: AppointmentId, pairs: &[(&str, &str)]) -> MirrorRow {
        let mut row = MirrorRow::new();
        row.set("id", id.to_string());
        for (column, value) in pairs {
            row.set(*column, *value);
        }
        row
    }

    fn t1() -> TenantId {
        TenantId::new("t1")
    }

    #[tokio::test]
    async fn test_first_write_initializes_header() {
        let (sync, mirror) = setup(Some("doc")).await;
        let id = AppointmentId::generate();
        let outcome = sync
            .try_reflect(&t1(), id, &row(id, &[("status", "pending")]))
            .await
            .unwrap();

        assert_eq!(outcome, ReflectOutcome::Appended);
        let rows = mirror.rows("doc").await;
        assert_eq!(rows[0], vec!["id".to_owned(), "status".to_owned()]);
        assert_eq!(rows[1], vec![id.to_string(), "pending".to_owned()]);
    }

    #[tokio::test]
    async fn test_second_write_updates_in_place() {
        let (sync, mirror) = setup(Some("doc")).await;
        let id = AppointmentId::generate();
        sync.try_reflect(&t1(), id, &row(id, &[("status", "pending")]))
            .await
            .unwrap();
        let outcome = sync
            .try_reflect(&t1(), id, &row(id, &[("status", "confirmed")]))
            .await
            .unwrap();

        assert_eq!(outcome, ReflectOutcome::Updated(1));
        let rows = mirror.rows("doc").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], "confirmed");
    }

    #[tokio::test]
    async fn test_new_columns_extend_header_and_keep_other_cells() {
        let (sync, mirror) = setup(Some("doc")).await;
        let id = AppointmentId::generate();
        mirror
            .seed(
                "doc",
                vec![
                    vec!["id".to_owned(), "notes".to_owned()],
                    vec![id.to_string(), "call first".to_owned()],
                ],
            )
            .await;

        sync.try_reflect(&t1(), id, &row(id, &[("service", "cut")]))
            .await
            .unwrap();

        let rows = mirror.rows("doc").await;
        assert_eq!(rows[0], vec!["id".to_owned(), "notes".to_owned(), "service".to_owned()]);
        assert_eq!(rows[1], vec![id.to_string(), "call first".to_owned(), "cut".to_owned()]);
    }

    #[tokio::test]
    async fn test_tenant_without_document_is_a_no_op() {
        let (sync, mirror) = setup(None).await;
        let id = AppointmentId::generate();
        let outcome = sync.try_reflect(&t1(), id, &row(id, &[])).await.unwrap();
        assert_eq!(outcome, ReflectOutcome::NotConfigured);
        assert_eq!(mirror.calls().await, 0);
    }

    #[tokio::test]
    async fn test_disabled_mirror_is_a_no_op() {
        let sync = MirrorSynchronizer::new(None, Arc::new(InMemoryTenantDirectory::new()));
        let id = AppointmentId::generate();
        let outcome = sync.try_reflect(&t1(), id, &row(id, &[])).await.unwrap();
        assert_eq!(outcome, ReflectOutcome::Disabled);
    }

    fn cell<'a>(rows: &'a [Vec<String>], id: AppointmentId, column: &str) -> Option<&'a str> {
        let header = header_of(rows);
        let index = header.find_row(rows, &id.to_string())?;
        rows.get(index)?.get(header.position(column)?).map(String::as_str)
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_each_others_columns() {
        let (sync, mirror) = setup(Some("doc")).await;
        mirror.seed("doc", vec![vec!["id".to_owned()]]).await;
        mirror.set_yielding(true);
        let (a, b) = (AppointmentId::generate(), AppointmentId::generate());
        let (row_a, row_b) = (
            row(a, &[("service", "haircut")]),
            row(b, &[("notes", "call first")]),
        );

        let tenant = t1();

        let (first, second) = tokio::join!(
            sync.try_reflect(&tenant, a, &row_a),
            sync.try_reflect(&tenant, b, &row_b),
        );
        assert_eq!(first.unwrap(), ReflectOutcome::Appended);
        assert_eq!(second.unwrap(), ReflectOutcome::Appended);

        let rows = mirror.rows("doc").await;
        let header = header_of(&rows);
        assert!(header.position("service").is_some());
        assert!(header.position("notes").is_some());
        assert_eq!(cell(&rows, a, "service"), Some("haircut"));
        assert_ne!(cell(&rows, a, "notes"), Some("haircut"));
        assert_eq!(cell(&rows, b, "notes"), Some("call first"));
        assert_ne!(cell(&rows, b, "service"), Some("call first"));
    }

    /// Replaces the header right after our first header write, the way a
    /// writer that read the sheet earlier would.
    struct Clobbered {
        inner: InMemoryMirror,
        header: tokio::sync::Mutex<Option<Vec<String>>>,
    }

    #[async_trait]
    impl MirrorService for Clobbered {
        async fn list_rows(&self, document: &MirrorDocumentId) -> Result<Vec<Vec<String>>, MirrorError> {
            self.inner.list_rows(document).await
        }

        async fn update_row(
            &self,
            document: &MirrorDocumentId,
            index: usize,
            cells: &[String],
        ) -> Result<(), MirrorError> {
            self.inner.update_row(document, index, cells).await?;
            if index == 0
                && let Some(theirs) = self.header.lock().await.take()
            {
                self.inner.update_row(document, 0, &theirs).await?;
            }
            Ok(())
        }

        async fn add_row(&self, document: &MirrorDocumentId, cells: &[String]) -> Result<(), MirrorError> {
            self.inner.add_row(document, cells).await
        }
    }

    #[tokio::test]
    async fn test_overwritten_header_is_merged_again() {
        let directory = InMemoryTenantDirectory::new();
        directory.add_tenant("t1", Some("doc")).await;
        let mirror = InMemoryMirror::new();
        mirror.seed("doc", vec![vec!["id".to_owned()]]).await;
        let service = Clobbered {
            inner: mirror.clone(),
            header: tokio::sync::Mutex::new(Some(vec!["id".to_owned(), "notes".to_owned()])),
        };
        let sync = MirrorSynchronizer::new(Some(Arc::new(service)), Arc::new(directory));
        let id = AppointmentId::generate();

        sync.try_reflect(&t1(), id, &row(id, &[("service", "haircut")]))
            .await
            .unwrap();

        let rows = mirror.rows("doc").await;
        assert_eq!(
            rows[0],
            vec!["id".to_owned(), "notes".to_owned(), "service".to_owned()]
        );
        assert_eq!(cell(&rows, id, "service"), Some("haircut"));
        assert_eq!(cell(&rows, id, "notes"), Some(""));
    }

    /// Accepts header writes and then forgets them.
    struct Forgetful(InMemoryMirror);

    #[async_trait]
    impl MirrorService for Forgetful {
        async fn list_rows(&self, document: &MirrorDocumentId) -> Result<Vec<Vec<String>>, MirrorError> {
            self.0.list_rows(document).await
        }

        async fn update_row(
            &self,
            document: &MirrorDocumentId,
            index: usize,
            cells: &[String],
        ) -> Result<(), MirrorError> {
            if index == 0 {
                return Ok(());
            }
            self.0.update_row(document, index, cells).await
        }

        async fn add_row(&self, document: &MirrorDocumentId, cells: &[String]) -> Result<(), MirrorError> {
            self.0.add_row(document, cells).await
        }
    }

    #[tokio::test]
    async fn test_header_that_never_settles_is_an_error() {
        let directory = InMemoryTenantDirectory::new();
        directory.add_tenant("t1", Some("doc")).await;
        let mirror = InMemoryMirror::new();
        mirror.seed("doc", vec![vec!["id".to_owned()]]).await;
        let sync = MirrorSynchronizer::new(
            Some(Arc::new(Forgetful(mirror.clone()))),
            Arc::new(directory),
        );
        let id = AppointmentId::generate();

        let err = sync
            .try_reflect(&t1(), id, &row(id, &[("service", "haircut")]))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Schema(_)));
        assert_eq!(mirror.rows("doc").await.len(), 1);
        assert_eq!(mirror.lists().await, MAX_HEADER_WRITES + 1);
    }

    #[tokio::test]
    async fn test_reflect_all_reads_the_sheet_once() {
        let (sync, mirror) = setup(Some("doc")).await;
        let known = AppointmentId::generate();
        mirror
            .seed(
                "doc",
                vec![
                    vec!["id".to_owned(), "status".to_owned()],
                    vec![known.to_string(), "pending".to_owned()],
                ],
            )
            .await;
        let (a, b) = (AppointmentId::generate(), AppointmentId::generate());
        let rows = vec![
            (known, row(known, &[("status", "confirmed")])),
            (a, row(a, &[("status", "pending"), ("service", "cut")])),
            (b, row(b, &[("status", "cancelled")])),
        ];

        let report = sync.reflect_all(&t1(), &rows).await.unwrap().unwrap();

        assert_eq!(
            report,
            ResyncReport {
                updated: 1,
                appended: 2,
                failed: 0
            }
        );
        // One read up front and one to confirm the extended header.
        assert_eq!(mirror.lists().await, 2);
        let sheet = mirror.rows("doc").await;
        assert_eq!(sheet.len(), 4);
        assert_eq!(cell(&sheet, known, "status"), Some("confirmed"));
        assert_eq!(cell(&sheet, a, "service"), Some("cut"));
    }

    #[tokio::test]
    async fn test_reflect_all_waits_out_rate_limits() {
        let (sync, mirror) = setup(Some("doc")).await;
        mirror.seed("doc", vec![vec!["id".to_owned()]]).await;
        mirror.rate_limit_next(2);
        let id = AppointmentId::generate();

        let report = sync
            .reflect_all(&t1(), &[(id, row(id, &[]))])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.appended, 1);
        assert_eq!(cell(&mirror.rows("doc").await, id, "id"), Some(id.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_reflect_all_gives_up_on_persistent_rate_limit() {
        let (sync, mirror) = setup(Some("doc")).await;
        mirror.rate_limit_next(MAX_RATE_LIMIT_RETRIES as usize + 1);
        let id = AppointmentId::generate();

        let err = sync.reflect_all(&t1(), &[(id, row(id, &[]))]).await;
        assert!(matches!(err, Err(MirrorError::RateLimited(0))));
        assert!(mirror.rows("doc").await.is_empty());
    }

    /// Refuses every append.
    struct Full(InMemoryMirror);

    #[async_trait]
    impl MirrorService for Full {
        async fn list_rows(&self, document: &MirrorDocumentId) -> Result<Vec<Vec<String>>, MirrorError> {
            self.0.list_rows(document).await
        }

        async fn update_row(
            &self,
            document: &MirrorDocumentId,
            index: usize,
            cells: &[String],
        ) -> Result<(), MirrorError> {
            self.0.update_row(document, index, cells).await
        }

        async fn add_row(&self, _document: &MirrorDocumentId, _cells: &[String]) -> Result<(), MirrorError> {
            Err(MirrorError::Status {
                status: 400,
                body: "grid limits exceeded".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_reflect_all_counts_failed_rows_and_carries_on() {
        let directory = InMemoryTenantDirectory::new();
        directory.add_tenant("t1", Some("doc")).await;
        let mirror = InMemoryMirror::new();
        let (fresh, known) = (AppointmentId::generate(), AppointmentId::generate());
        mirror
            .seed(
                "doc",
                vec![
                    vec!["id".to_owned(), "status".to_owned()],
                    vec![known.to_string(), "pending".to_owned()],
                ],
            )
            .await;
        let sync = MirrorSynchronizer::new(Some(Arc::new(Full(mirror.clone()))), Arc::new(directory));

        let report = sync
            .reflect_all(
                &t1(),
                &[
                    (fresh, row(fresh, &[("status", "pending")])),
                    (known, row(known, &[("status", "confirmed")])),
                ],
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            report,
            ResyncReport {
                updated: 1,
                appended: 0,
                failed: 1
            }
        );
        assert_eq!(cell(&mirror.rows("doc").await, known, "status"), Some("confirmed"));
    }

    #[tokio::test]
    async fn test_reflect_all_without_document_does_nothing() {
        let (sync, mirror) = setup(None).await;
        let id = AppointmentId::generate();
        assert!(sync.reflect_all(&t1(), &[(id, row(id, &[]))]).await.unwrap().is_none());
        assert_eq!(mirror.calls().await, 0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed_by_reflect() {
        let (sync, mirror) = setup(Some("doc")).await;
        mirror.set_unreachable(true);
        let id = AppointmentId::generate();

        assert!(sync.try_reflect(&t1(), id, &row(id, &[])).await.is_err());
        sync.reflect(&t1(), id, &row(id, &[])).await;
    }
}
