//! Change detectors backed by [`PortalStore`].
//!
//! Each detector runs its query on the blocking pool so a slow database
//! never stalls the async workers driving other tenants' streams.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_feed::{ChangeDetector, ChangedRecord, DetectorError, DetectorSet, Domain, TenantId};

use crate::error::StoreError;
use crate::store::PortalStore;
use crate::types::{Case, Document, FinancialRecord, Message, Notification};

impl From<StoreError> for DetectorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Task(msg) => DetectorError::Unavailable(msg),
            StoreError::Database(e @ rusqlite::Error::SqliteFailure(..)) => {
                DetectorError::Unavailable(e.to_string())
            }
            other => DetectorError::Query(other.to_string()),
        }
    }
}

/// Run a store query on the blocking pool and convert its rows.
async fn detect_with<T, Q, C>(
    store: &Arc<PortalStore>,
    tenant: &TenantId,
    since: DateTime<Utc>,
    limit: usize,
    query: Q,
    convert: C,
) -> Result<Vec<ChangedRecord>, DetectorError>
where
    T: Send + 'static,
    Q: FnOnce(&PortalStore, &TenantId, DateTime<Utc>, usize) -> crate::Result<Vec<T>>
        + Send
        + 'static,
    C: Fn(&T) -> ChangedRecord,
{
    let store = Arc::clone(store);
    let tenant = tenant.clone();

    let rows = tokio::task::spawn_blocking(move || query(&store, &tenant, since, limit))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

    Ok(rows.iter().map(convert).collect())
}

/// Watches new messages.
#[derive(Debug, Clone)]
pub struct MessageDetector {
    store: Arc<PortalStore>,
}

impl MessageDetector {
    pub fn new(store: Arc<PortalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeDetector for MessageDetector {
    fn domain(&self) -> Domain {
        Domain::Message
    }

    async fn detect(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>, DetectorError> {
        detect_with(
            &self.store,
            tenant,
            since,
            limit,
            |s, t, since, limit| s.messages_since(t, since, limit),
            Message::to_changed_record,
        )
        .await
    }
}

/// Watches new notifications.
#[derive(Debug, Clone)]
pub struct NotificationDetector {
    store: Arc<PortalStore>,
}

impl NotificationDetector {
    pub fn new(store: Arc<PortalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeDetector for NotificationDetector {
    fn domain(&self) -> Domain {
        Domain::Notification
    }

    async fn detect(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>, DetectorError> {
        detect_with(
            &self.store,
            tenant,
            since,
            limit,
            |s, t, since, limit| s.notifications_since(t, since, limit),
            Notification::to_changed_record,
        )
        .await
    }
}

/// Watches case updates.
#[derive(Debug, Clone)]
pub struct CaseDetector {
    store: Arc<PortalStore>,
}

impl CaseDetector {
    pub fn new(store: Arc<PortalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeDetector for CaseDetector {
    fn domain(&self) -> Domain {
        Domain::Case
    }

    async fn detect(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>, DetectorError> {
        detect_with(
            &self.store,
            tenant,
            since,
            limit,
            |s, t, since, limit| s.cases_since(t, since, limit),
            Case::to_changed_record,
        )
        .await
    }
}

/// Watches document updates.
#[derive(Debug, Clone)]
pub struct DocumentDetector {
    store: Arc<PortalStore>,
}

impl DocumentDetector {
    pub fn new(store: Arc<PortalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeDetector for DocumentDetector {
    fn domain(&self) -> Domain {
        Domain::Document
    }

    async fn detect(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>, DetectorError> {
        detect_with(
            &self.store,
            tenant,
            since,
            limit,
            |s, t, since, limit| s.documents_since(t, since, limit),
            Document::to_changed_record,
        )
        .await
    }
}

/// Watches invoices, payments and other billing entries.
#[derive(Debug, Clone)]
pub struct FinancialDetector {
    store: Arc<PortalStore>,
}

impl FinancialDetector {
    pub fn new(store: Arc<PortalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeDetector for FinancialDetector {
    fn domain(&self) -> Domain {
        Domain::Financial
    }

    async fn detect(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>, DetectorError> {
        detect_with(
            &self.store,
            tenant,
            since,
            limit,
            |s, t, since, limit| s.financial_records_since(t, since, limit),
            FinancialRecord::to_changed_record,
        )
        .await
    }
}

/// All five detectors over one store, in domain order.
pub fn standard_detectors(store: Arc<PortalStore>) -> DetectorSet {
    DetectorSet::new()
        .with(MessageDetector::new(Arc::clone(&store)))
        .with(NotificationDetector::new(Arc::clone(&store)))
        .with(CaseDetector::new(Arc::clone(&store)))
        .with(DocumentDetector::new(Arc::clone(&store)))
        .with(FinancialDetector::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> Arc<PortalStore> {
        Arc::new(PortalStore::open_in_memory().unwrap())
    }

    #[test]
    fn test_standard_detectors_cover_all_domains() {
        let set = standard_detectors(store());
        assert_eq!(set.domains(), Domain::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_message_detector_reports_new_rows() {
        let store = store();
        let tenant = TenantId::new("acme");
        let since = Utc::now() - Duration::seconds(10);
        let msg = Message::new(tenant.clone(), "counsel", "Signed copy attached");
        store.insert_message(&msg).unwrap();

        let detector = MessageDetector::new(Arc::clone(&store));
        let records = detector.detect(&tenant, since, 50).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, msg.id);
        assert_eq!(records[0].tenant_id, tenant);
        assert_eq!(records[0].fields["body"], "Signed copy attached");
    }

    #[tokio::test]
    async fn test_case_detector_uses_updated_at() {
        let store = store();
        let tenant = TenantId::new("acme");
        let t0 = Utc::now();
        let case = Case::new(tenant.clone(), "Lease", "open").at(t0);
        store.insert_case(&case).unwrap();

        let detector = CaseDetector::new(Arc::clone(&store));
        assert!(detector.detect(&tenant, t0, 50).await.unwrap().is_empty());

        store
            .insert_case(&case.clone().at(t0 + Duration::seconds(1)))
            .unwrap();
        let records = detector.detect(&tenant, t0, 50).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["status"], "open");
    }

    #[tokio::test]
    async fn test_detector_sees_row_in_same_microsecond_as_cursor() {
        let store = store();
        let tenant = TenantId::new("acme");
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let msg = Message::new(tenant.clone(), "counsel", "Just after the cursor")
            .at(base + Duration::nanoseconds(900));
        store.insert_message(&msg).unwrap();

        let detector = MessageDetector::new(Arc::clone(&store));
        let records = detector
            .detect(&tenant, base + Duration::nanoseconds(500), 50)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, msg.id);
    }

    #[test]
    fn test_store_errors_map_to_detector_errors() {
        let err: DetectorError = StoreError::Task("join failed".to_string()).into();
        assert!(matches!(err, DetectorError::Unavailable(_)));

        let err: DetectorError = StoreError::InvalidData("bad timestamp".to_string()).into();
        assert!(matches!(err, DetectorError::Query(_)));
    }
}
