//! SQLite-backed storage for the Docket client portal.
//!
//! This crate provides the read side the change feed polls and the write
//! side used by the CLI and tests:
//! - [`PortalStore`]: one SQLite database holding messages, notifications,
//!   cases, documents and financial records
//! - One [`ChangeDetector`](docket_feed::ChangeDetector) per domain, built
//!   by [`standard_detectors`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docket_store::{PortalStore, standard_detectors};
//!
//! let store = Arc::new(PortalStore::open("docket.db")?);
//! let detectors = standard_detectors(Arc::clone(&store));
//! ```

pub mod detectors;
pub mod error;
pub mod store;
pub mod types;

pub use detectors::{
    CaseDetector, DocumentDetector, FinancialDetector, MessageDetector, NotificationDetector,
    standard_detectors,
};
pub use error::{Result, StoreError};
pub use store::PortalStore;
pub use types::{Case, Document, FinancialRecord, Message, Notification, PortalRecord};
