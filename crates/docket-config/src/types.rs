//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]                 # bind address, rate limiting, request logging
//! [feed]                   # stream timing, in seconds
//! [storage]                # database location
//! [logging]                # level and JSON file output
//!
//! [[tenants]]              # one entry per tenant credential
//! id = "acme"
//! token = "..."
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default values shared by the config sections.
pub mod defaults {
    pub const DEFAULT_PORT: u16 = 8780;
    pub const DEFAULT_BIND: &str = "127.0.0.1";
    pub const REQUESTS_PER_MINUTE: u32 = 120;

    pub const POLL_INTERVAL_SECS: u64 = 5;
    pub const HEARTBEAT_SECS: u64 = 30;
    pub const MAX_SESSION_AGE_SECS: u64 = 60 * 60;
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
    pub const STALE_AFTER_SECS: u64 = 5 * 60;
    pub const PAGE_SIZE: usize = 50;
    pub const SINK_BUFFER: usize = 64;
    pub const MAX_STREAMS_PER_TENANT: usize = 8;

    pub const LOG_LEVEL: &str = "info";
    pub const DATABASE_FILE: &str = "docket.db";
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Maps to the full TOML config file. All sections are optional so that
/// partial configs (e.g., project-local overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocketConfig {
    /// HTTP server configuration.
    pub server: Option<ServerSection>,

    /// Change feed timing.
    pub feed: Option<FeedSection>,

    /// Storage configuration.
    pub storage: Option<StorageSection>,

    /// Logging configuration.
    pub logging: Option<LoggingSection>,

    /// Tenant credentials.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tenants: Vec<TenantEntry>,
}

impl DocketConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale. Tenants are merged by id.
    pub fn merge(&mut self, other: DocketConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }

        if other.feed.is_some() {
            self.feed = other.feed;
        }

        if other.storage.is_some() {
            self.storage = other.storage;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }

        for tenant in other.tenants {
            match self.tenants.iter_mut().find(|t| t.id == tenant.id) {
                Some(existing) => *existing = tenant,
                None => self.tenants.push(tenant),
            }
        }
    }

    /// Effective server section.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    /// Effective feed section.
    pub fn feed(&self) -> FeedSection {
        self.feed.clone().unwrap_or_default()
    }

    /// Effective logging section.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Look up a tenant by its token.
    pub fn tenant_for_token(&self, token: &str) -> Option<&TenantEntry> {
        self.tenants.iter().find(|t| t.token == token)
    }

    /// Check values that would make the server misbehave.
    pub fn validate(&self) -> Result<()> {
        self.feed().validate()?;

        let mut tokens = HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.trim().is_empty() {
                return Err(invalid("tenants.id", "must not be empty"));
            }
            if tenant.token.is_empty() {
                return Err(invalid(
                    "tenants.token",
                    &format!("tenant '{}' has an empty token", tenant.id),
                ));
            }
            if !tokens.insert(tenant.token.as_str()) {
                return Err(invalid(
                    "tenants.token",
                    &format!("tenant '{}' reuses another tenant's token", tenant.id),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Port to listen on.
    pub port: u16,
    /// Address to bind to.
    pub bind: String,
    /// Enable rate limiting.
    pub rate_limiting: bool,
    /// API rate limit: requests per minute.
    pub api_rpm: u32,
    /// Enable request logging.
    pub request_logging: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: defaults::DEFAULT_PORT,
            bind: defaults::DEFAULT_BIND.to_string(),
            rate_limiting: true,
            api_rpm: defaults::REQUESTS_PER_MINUTE,
            request_logging: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Feed Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Change feed timing and limits.
///
/// ```toml
/// [feed]
/// poll_interval_secs = 5
/// heartbeat_secs = 30
/// max_session_age_secs = 3600
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    /// Seconds between polls of one stream.
    pub poll_interval_secs: u64,
    /// Idle seconds before a heartbeat is sent.
    pub heartbeat_secs: u64,
    /// Seconds after which a stream is force-closed.
    pub max_session_age_secs: u64,
    /// Seconds between stale-session sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds without a poll before a session counts as stale.
    pub stale_after_secs: u64,
    /// Maximum rows per domain per tick.
    pub page_size: usize,
    /// Encoded frames buffered per stream.
    pub sink_buffer: usize,
    /// Concurrent streams allowed per tenant.
    pub max_streams_per_tenant: usize,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::POLL_INTERVAL_SECS,
            heartbeat_secs: defaults::HEARTBEAT_SECS,
            max_session_age_secs: defaults::MAX_SESSION_AGE_SECS,
            sweep_interval_secs: defaults::SWEEP_INTERVAL_SECS,
            stale_after_secs: defaults::STALE_AFTER_SECS,
            page_size: defaults::PAGE_SIZE,
            sink_buffer: defaults::SINK_BUFFER,
            max_streams_per_tenant: defaults::MAX_STREAMS_PER_TENANT,
        }
    }
}

impl FeedSection {
    fn validate(&self) -> Result<()> {
        let positive = [
            ("feed.poll_interval_secs", self.poll_interval_secs),
            ("feed.heartbeat_secs", self.heartbeat_secs),
            ("feed.max_session_age_secs", self.max_session_age_secs),
            ("feed.sweep_interval_secs", self.sweep_interval_secs),
            ("feed.stale_after_secs", self.stale_after_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        // A session that polls less often than the staleness threshold would
        // be swept while healthy.
        if self.stale_after_secs <= self.poll_interval_secs {
            return Err(invalid(
                "feed.stale_after_secs",
                "must be longer than feed.poll_interval_secs",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Path to the SQLite database. Defaults to `docket.db` in the config dir.
    pub database: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
    /// Write JSON logs to `<config dir>/logs/`.
    pub json_file: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_file: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenants
// ─────────────────────────────────────────────────────────────────────────────

/// A tenant and the bearer token that authenticates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantEntry {
    pub id: String,
    pub token: String,
}
