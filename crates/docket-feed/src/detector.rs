//! Change detectors and the ordered set a scheduler polls.
//!
//! A detector answers one question for one domain: which rows of this
//! tenant changed strictly after `since`? Implementations are read-only,
//! return rows newest first, and never return more than `limit` rows.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{ChangedRecord, Domain, TenantId};

/// Recoverable detector failure. The scheduler logs it and treats the
/// domain as unchanged for that tick.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// Storage could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The query itself failed.
    #[error("query failed: {0}")]
    Query(String),
}

/// Read-only change query for one data domain.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Domain this detector watches.
    fn domain(&self) -> Domain;

    /// Rows of `tenant` changed strictly after `since`, newest first,
    /// at most `limit` of them.
    async fn detect(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChangedRecord>, DetectorError>;
}

/// Detectors polled by every session, kept in domain order.
#[derive(Clone, Default)]
pub struct DetectorSet {
    detectors: Vec<Arc<dyn ChangeDetector>>,
}

impl DetectorSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detector, replacing any existing detector for the same domain.
    pub fn with(mut self, detector: impl ChangeDetector + 'static) -> Self {
        self.insert(Arc::new(detector));
        self
    }

    /// Add a shared detector, replacing any existing detector for the same domain.
    pub fn insert(&mut self, detector: Arc<dyn ChangeDetector>) {
        let domain = detector.domain();
        self.detectors.retain(|d| d.domain() != domain);
        let pos = self
            .detectors
            .iter()
            .position(|d| d.domain() > domain)
            .unwrap_or(self.detectors.len());
        self.detectors.insert(pos, detector);
    }

    /// Detectors in emission order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChangeDetector>> {
        self.detectors.iter()
    }

    /// Domains covered, in emission order.
    pub fn domains(&self) -> Vec<Domain> {
        self.detectors.iter().map(|d| d.domain()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl fmt::Debug for DetectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorSet")
            .field("domains", &self.domains())
            .finish()
    }
}
