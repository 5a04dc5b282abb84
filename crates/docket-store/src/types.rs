//! Portal records, one type per data domain.
//!
//! Messages and notifications are append-only and change when created.
//! Cases, documents and financial records are mutable and change when
//! `updated_at` moves.

use chrono::{DateTime, Utc};
use docket_feed::{ChangedRecord, Domain, TenantId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// A message exchanged between the firm and a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_id")]
    pub id: String,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub case_id: Option<String>,
    pub sender: String,
    pub body: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(tenant_id: TenantId, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            tenant_id,
            case_id: None,
            sender: sender.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    /// Attach the message to a case.
    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    /// Override the creation time.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn to_changed_record(&self) -> ChangedRecord {
        ChangedRecord::new(&self.id, self.tenant_id.clone(), self.created_at)
            .with_field("case_id", self.case_id.clone())
            .with_field("sender", self.sender.as_str())
            .with_field("body", self.body.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

/// A system notification shown to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default = "new_id")]
    pub id: String,
    pub tenant_id: TenantId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(tenant_id: TenantId, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            tenant_id,
            title: title.into(),
            body: body.into(),
            read: false,
            created_at: Utc::now(),
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn to_changed_record(&self) -> ChangedRecord {
        ChangedRecord::new(&self.id, self.tenant_id.clone(), self.created_at)
            .with_field("title", self.title.as_str())
            .with_field("body", self.body.as_str())
            .with_field("read", self.read)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cases
// ─────────────────────────────────────────────────────────────────────────────

/// A matter the firm is handling for a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    #[serde(default = "new_id")]
    pub id: String,
    pub tenant_id: TenantId,
    pub title: String,
    pub status: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Case {
    pub fn new(tenant_id: TenantId, title: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            tenant_id,
            title: title.into(),
            status: status.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn to_changed_record(&self) -> ChangedRecord {
        ChangedRecord::new(&self.id, self.tenant_id.clone(), self.updated_at)
            .with_field("title", self.title.as_str())
            .with_field("status", self.status.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Documents
// ─────────────────────────────────────────────────────────────────────────────

/// A file shared with a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "new_id")]
    pub id: String,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub case_id: Option<String>,
    pub name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

impl Document {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            tenant_id,
            case_id: None,
            name: name.into(),
            content_type: default_content_type(),
            size_bytes: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>, size_bytes: i64) -> Self {
        self.content_type = content_type.into();
        self.size_bytes = size_bytes;
        self
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn to_changed_record(&self) -> ChangedRecord {
        ChangedRecord::new(&self.id, self.tenant_id.clone(), self.updated_at)
            .with_field("case_id", self.case_id.clone())
            .with_field("name", self.name.as_str())
            .with_field("content_type", self.content_type.as_str())
            .with_field("size_bytes", self.size_bytes)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Financial records
// ─────────────────────────────────────────────────────────────────────────────

/// An invoice, payment or other billing entry.
///
/// Amounts are integer minor units (cents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    #[serde(default = "new_id")]
    pub id: String,
    pub tenant_id: TenantId,
    pub kind: String,
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub status: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl FinancialRecord {
    pub fn new(tenant_id: TenantId, kind: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            id: new_id(),
            tenant_id,
            kind: kind.into(),
            amount_cents,
            currency: default_currency(),
            status: "open".to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn to_changed_record(&self) -> ChangedRecord {
        ChangedRecord::new(&self.id, self.tenant_id.clone(), self.updated_at)
            .with_field("kind", self.kind.as_str())
            .with_field("amount_cents", self.amount_cents)
            .with_field("currency", self.currency.as_str())
            .with_field("status", self.status.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Any record
// ─────────────────────────────────────────────────────────────────────────────

/// A record of any domain, for callers that pick the domain at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum PortalRecord {
    Message(Message),
    Notification(Notification),
    Case(Case),
    Document(Document),
    Financial(FinancialRecord),
}

impl PortalRecord {
    /// Parse a JSON object into a record of `domain` owned by `tenant`.
    ///
    /// `id` and the timestamp default to a fresh uuid and now; any
    /// `tenant_id` in the JSON is overwritten.
    pub fn from_json(domain: Domain, tenant: &TenantId, json: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(json)?;
        let Some(object) = value.as_object_mut() else {
            return Err(StoreError::InvalidData(
                "record must be a JSON object".to_string(),
            ));
        };
        object.insert(
            "tenant_id".to_string(),
            serde_json::Value::String(tenant.as_str().to_string()),
        );

        let record = match domain {
            Domain::Message => Self::Message(serde_json::from_value(value)?),
            Domain::Notification => Self::Notification(serde_json::from_value(value)?),
            Domain::Case => Self::Case(serde_json::from_value(value)?),
            Domain::Document => Self::Document(serde_json::from_value(value)?),
            Domain::Financial => Self::Financial(serde_json::from_value(value)?),
        };
        Ok(record)
    }

    pub fn domain(&self) -> Domain {
        match self {
            Self::Message(_) => Domain::Message,
            Self::Notification(_) => Domain::Notification,
            Self::Case(_) => Domain::Case,
            Self::Document(_) => Domain::Document,
            Self::Financial(_) => Domain::Financial,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Message(r) => &r.id,
            Self::Notification(r) => &r.id,
            Self::Case(r) => &r.id,
            Self::Document(r) => &r.id,
            Self::Financial(r) => &r.id,
        }
    }

    pub fn to_changed_record(&self) -> ChangedRecord {
        match self {
            Self::Message(r) => r.to_changed_record(),
            Self::Notification(r) => r.to_changed_record(),
            Self::Case(r) => r.to_changed_record(),
            Self::Document(r) => r.to_changed_record(),
            Self::Financial(r) => r.to_changed_record(),
        }
    }
}
