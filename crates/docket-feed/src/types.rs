//! Identifiers, domains and the events carried over a stream.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque identifier of an authenticated tenant.
///
/// Every detector call and every stream session is scoped to exactly one
/// tenant. The value is supplied by the authentication layer and never
/// re-validated mid-stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Domains
// ─────────────────────────────────────────────────────────────────────────────

/// A data domain watched on behalf of a tenant.
///
/// Declaration order is the emission order within a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Message,
    Notification,
    Case,
    Document,
    Financial,
}

impl Domain {
    /// All domains, in emission order.
    pub const ALL: [Domain; 5] = [
        Domain::Message,
        Domain::Notification,
        Domain::Case,
        Domain::Document,
        Domain::Financial,
    ];

    /// Wire name of the domain (also the event type of its change events).
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Message => "message",
            Domain::Notification => "notification",
            Domain::Case => "case",
            Domain::Document => "document",
            Domain::Financial => "financial",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" | "messages" => Ok(Domain::Message),
            "notification" | "notifications" => Ok(Domain::Notification),
            "case" | "cases" => Ok(Domain::Case),
            "document" | "documents" => Ok(Domain::Document),
            "financial" | "financials" => Ok(Domain::Financial),
            other => Err(format!("unknown domain '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records and events
// ─────────────────────────────────────────────────────────────────────────────

/// A single row reported by a change detector.
///
/// `changed_at` is the timestamp the detector compared against `since`
/// (creation time for append-only domains, update time otherwise).
/// Domain-specific columns are carried in `fields` and flattened on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedRecord {
    pub id: String,
    #[serde(skip)]
    pub tenant_id: TenantId,
    pub changed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ChangedRecord {
    /// Create a record with no extra fields.
    pub fn new(id: impl Into<String>, tenant_id: TenantId, changed_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            tenant_id,
            changed_at,
            fields: serde_json::Map::new(),
        }
    }

    /// Attach a domain field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Why a stream session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The transport reported the client went away.
    Disconnect,
    /// Writing to the client failed.
    SinkFailed,
    /// The session reached its maximum age.
    MaxAge,
    /// The sweeper found the session inactive.
    Stale,
    /// The process is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Disconnect => "disconnect",
            CloseReason::SinkFailed => "sink_failed",
            CloseReason::MaxAge => "max_age",
            CloseReason::Stale => "stale",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Newly changed rows of one domain, emitted in a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub domain: Domain,
    /// Newest first, as returned by the detector.
    pub items: Vec<ChangedRecord>,
    pub emitted_at: DateTime<Utc>,
}

/// An event pushed to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First frame of every stream, carrying the session id.
    Connected {
        session_id: SessionId,
        emitted_at: DateTime<Utc>,
    },
    /// Changes in one domain.
    Change(ChangeEvent),
    /// Content-free liveness signal.
    Heartbeat { emitted_at: DateTime<Utc> },
    /// Last frame before a server-initiated close.
    Closing {
        reason: CloseReason,
        emitted_at: DateTime<Utc>,
    },
}

impl StreamEvent {
    /// Wire event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Change(change) => change.domain.as_str(),
            StreamEvent::Heartbeat { .. } => "heartbeat",
            StreamEvent::Closing { .. } => "closing",
        }
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        match self {
            StreamEvent::Connected { emitted_at, .. }
            | StreamEvent::Heartbeat { emitted_at }
            | StreamEvent::Closing { emitted_at, .. } => *emitted_at,
            StreamEvent::Change(change) => change.emitted_at,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, StreamEvent::Heartbeat { .. })
    }
}
