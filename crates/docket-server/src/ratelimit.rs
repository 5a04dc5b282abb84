//! Rate limiting and request logging middleware.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::RETRY_AFTER,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    state::{InMemoryState, NotKeyed},
};

use crate::error::ServerError;
use crate::routes::streams::STREAM_SESSION_HEADER;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Rate limiter type alias (uses default clock).
pub type SharedRateLimiter =
    Arc<RateLimiter<NotKeyed, InMemoryState, governor::clock::DefaultClock>>;

// ─────────────────────────────────────────────────────────────────────────────
// Rate Limiter Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Create a rate limiter with the specified requests per minute.
///
/// Zero falls back to one request per minute.
pub fn create_rate_limiter(requests_per_minute: u32) -> SharedRateLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Rate limiting middleware for API endpoints.
///
/// Uses one limiter for the whole server, not per client. Opening a stream
/// counts as a single request however long the stream stays open.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.rate_limiting {
        return next.run(request).await;
    }

    match state.limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_not_until) => {
            let retry_after = 1u64;

            tracing::warn!(
                path = %request.uri().path(),
                retry_after_seconds = retry_after,
                "Rate limit exceeded"
            );

            (
                [(RETRY_AFTER, retry_after.to_string())],
                ServerError::RateLimitExceeded,
            )
                .into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Structured request logging middleware.
///
/// Logs method, path, status and time to response headers. A stream's
/// duration covers opening it, not its lifetime, so opened streams carry
/// their session id to tie the request to the feed's own open/close logs.
/// Health checks are logged at debug.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    let stream_session = response
        .headers()
        .get(STREAM_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    macro_rules! log_request {
        ($level:ident, $message:literal) => {
            tracing::$level!(
                method = %method,
                path = %path,
                status,
                duration_ms,
                stream_session = %stream_session,
                $message
            )
        };
    }

    match response.status() {
        s if s.is_server_error() => log_request!(error, "Request failed"),
        s if s.is_client_error() => log_request!(warn, "Request rejected"),
        _ if path == "/health" => log_request!(debug, "Health check"),
        _ if stream_session != "-" => log_request!(info, "Stream request accepted"),
        _ => log_request!(info, "Request completed"),
    }

    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{Router, http::StatusCode, middleware, routing::get};
    use docket_feed::{DetectorSet, FeedConfig, LifecycleManager};
    use tower::ServiceExt;

    fn create_test_router(config: ServerConfig) -> Router {
        let state = AppState::new(
            config,
            LifecycleManager::new(DetectorSet::new(), FeedConfig::default()),
        );
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                request_logging_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
            .with_state(state)
    }

    fn ping() -> Request<Body> {
        Request::builder().uri("/ping").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_after_quota() {
        let app = create_test_router(ServerConfig::new().with_api_rpm(1));

        let first = app.clone().oneshot(ping()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(ping()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn test_rate_limit_disabled() {
        let app = create_test_router(
            ServerConfig::new()
                .with_api_rpm(1)
                .with_rate_limiting(false),
        );

        for _ in 0..3 {
            let response = app.clone().oneshot(ping()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_request_logging_passes_stream_response_through() {
        let state = AppState::new(
            ServerConfig::new().with_request_logging(true),
            LifecycleManager::new(DetectorSet::new(), FeedConfig::default()),
        );
        let app = Router::new()
            .route(
                "/stream",
                get(|| async { ([(STREAM_SESSION_HEADER, "session-1")], "data: {}\n\n") }),
            )
            .route("/health", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                request_logging_middleware,
            ))
            .with_state(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[STREAM_SESSION_HEADER], "session-1");

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_zero_rpm_still_allows_one_request() {
        let limiter = create_rate_limiter(0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
