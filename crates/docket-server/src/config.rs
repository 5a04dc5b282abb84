//! Server configuration.

use std::net::SocketAddr;

use docket_feed::TenantId;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8780";

/// Default API rate limit (requests per minute).
pub const DEFAULT_API_RPM: u32 = 120;

/// A bearer token and the tenant it authenticates.
#[derive(Clone)]
pub struct TenantCredential {
    pub tenant_id: TenantId,
    pub token: String,
}

impl std::fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredential")
            .field("tenant_id", &self.tenant_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Tenant credentials. A request must present one of these tokens.
    pub tenants: Vec<TenantCredential>,

    /// Enable rate limiting.
    pub rate_limiting: bool,

    /// Rate limit: requests per minute for API endpoints.
    pub api_rpm: u32,

    /// Enable request logging.
    pub request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8780)),
            tenants: Vec::new(),
            rate_limiting: true,
            api_rpm: DEFAULT_API_RPM,
            request_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Add a tenant credential.
    pub fn with_tenant(mut self, tenant_id: impl Into<TenantId>, token: impl Into<String>) -> Self {
        self.tenants.push(TenantCredential {
            tenant_id: tenant_id.into(),
            token: token.into(),
        });
        self
    }

    /// Enable or disable rate limiting.
    pub fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.rate_limiting = enabled;
        self
    }

    /// Set the API rate limit (requests per minute).
    pub fn with_api_rpm(mut self, rpm: u32) -> Self {
        self.api_rpm = rpm;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_matches_constant() {
        let expected: SocketAddr = DEFAULT_BIND_ADDRESS.parse().unwrap();
        assert_eq!(ServerConfig::default().bind_address, expected);
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let config = ServerConfig::new().with_tenant("acme", "super-secret");
        let debug = format!("{:?}", config);
        assert!(debug.contains("acme"));
        assert!(!debug.contains("super-secret"));
    }
}
