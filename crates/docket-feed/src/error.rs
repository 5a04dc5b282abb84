//! Error types for the change feed.

use crate::detector::DetectorError;
use crate::encoder::EncodeError;
use crate::sink::SinkError;
use crate::types::{SessionId, TenantId};

/// Error type for feed operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A session with this id is already registered.
    #[error("Session already registered: {0}")]
    DuplicateSession(SessionId),

    /// The tenant already holds the maximum number of open streams.
    #[error("Tenant {tenant} already has {limit} open streams")]
    TenantLimit { tenant: TenantId, limit: usize },

    /// A change detector failed.
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    /// An event could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The output sink rejected a write.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, Error>;
