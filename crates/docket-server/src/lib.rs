//! HTTP server for the Docket change feed.
//!
//! This crate exposes per-tenant change streams over HTTP.
//!
//! # Features
//!
//! - Long-lived Server-Sent Events stream per client (`GET /api/v1/stream`)
//! - Per-tenant bearer token authentication
//! - Rate limiting
//! - Request logging
//!
//! # Example
//!
//! ```ignore
//! use docket_server::{Server, ServerConfig};
//! use docket_feed::{FeedConfig, LifecycleManager};
//!
//! let feed = LifecycleManager::new(detectors, FeedConfig::default());
//! let config = ServerConfig::new()
//!     .with_tenant("acme", "acme-token")
//!     .with_bind_address("127.0.0.1:8780".parse()?);
//!
//! Server::new(config, feed).run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod routes;
pub mod state;

pub use auth::{AuthError, Identity, auth_middleware};
pub use config::{ServerConfig, TenantCredential};
pub use error::{Result, ServerError};
pub use ratelimit::{rate_limit_middleware, request_logging_middleware};
pub use routes::streams::STREAM_SESSION_HEADER;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, middleware};
use docket_feed::LifecycleManager;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The Docket HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server with the given configuration and feed.
    pub fn new(config: ServerConfig, feed: LifecycleManager) -> Self {
        Self {
            state: AppState::new(config, feed),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            // Health routes (no auth required)
            .merge(routes::health_routes())
            .nest("/api/v1", self.api_routes())
            // Request logging (inner layer, runs first)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                ratelimit::request_logging_middleware,
            ))
            // Rate limiting (outer layer, runs before request logging)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                ratelimit::rate_limit_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// API routes (v1). All require authentication.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::get;

        Router::new()
            .route("/stream", get(routes::stream_handler))
            .route("/streams", get(routes::list_streams_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
    }

    /// Run the server until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_until(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// Starts the stale-session sweeper. On shutdown every open stream is
    /// closed first, so long-lived connections do not hold up the graceful
    /// drain.
    pub async fn run_until(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.router();
        let feed = self.state.feed.clone();

        info!("Starting server on {}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;

        let sweeper = feed.spawn_sweeper();

        let drain = feed.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                drain.shutdown();
            })
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)));

        feed.shutdown();
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Sweeper task did not stop cleanly");
        }

        info!("Server stopped");
        result
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
