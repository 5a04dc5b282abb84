//! Application state shared across handlers.

use std::sync::Arc;

use docket_feed::LifecycleManager;

use crate::config::ServerConfig;
use crate::ratelimit::{SharedRateLimiter, create_rate_limiter};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Stream lifecycle manager.
    pub feed: LifecycleManager,

    /// API rate limiter, sized from `config.api_rpm`.
    pub limiter: SharedRateLimiter,
}

impl AppState {
    /// Create a new application state.
    pub fn new(config: ServerConfig, feed: LifecycleManager) -> Self {
        let limiter = create_rate_limiter(config.api_rpm);
        Self {
            config: Arc::new(config),
            feed,
            limiter,
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
