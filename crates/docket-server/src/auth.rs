//! Authentication middleware.
//!
//! Maps a bearer token to the tenant it belongs to. Browsers' `EventSource`
//! cannot set headers, so the token may also be passed as the
//! `access_token` query parameter.
//!
//! # Security
//!
//! Token comparison uses constant-time comparison to prevent timing attacks.

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use docket_feed::TenantId;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::config::TenantCredential;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated identity: the tenant a request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tenant_id: TenantId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Error
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No token in the header or query string.
    #[error("Missing authorization token")]
    MissingToken,
    /// Authorization header is not `Bearer <token>`.
    #[error("Invalid authorization format")]
    InvalidFormat,
    /// Token does not belong to any tenant.
    #[error("Invalid token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing_token"),
            AuthError::InvalidFormat => (StatusCode::BAD_REQUEST, "invalid_format"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
        };

        let body = serde_json::json!({
            "code": code,
            "message": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Security Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Compare two strings in constant time.
///
/// Differing lengths still perform a comparison so the timing does not
/// reveal how much of the token matched.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}

/// Find the tenant owning `token`.
///
/// Every credential is compared, so the time taken does not depend on
/// which tenant matched.
fn tenant_for_token(credentials: &[TenantCredential], token: &str) -> Option<TenantId> {
    let mut found = None;
    for credential in credentials {
        if constant_time_eq(token, &credential.token) && found.is_none() {
            found = Some(credential.tenant_id.clone());
        }
    }
    found
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Authentication middleware function.
///
/// Validates the request and injects the `Identity` into request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = validate_request(&request, &state)?;

    tracing::debug!(tenant_id = %identity.tenant_id, "Request authenticated");
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// Validate a request and return the identity.
fn validate_request(request: &Request<Body>, state: &AppState) -> Result<Identity, AuthError> {
    let token = match request.headers().get(AUTHORIZATION) {
        Some(header) => {
            let value = header.to_str().map_err(|_| AuthError::InvalidFormat)?;
            value
                .strip_prefix("Bearer ")
                .ok_or(AuthError::InvalidFormat)?
                .to_string()
        }
        None => Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|q| q.0.access_token)
            .ok_or(AuthError::MissingToken)?,
    };

    tenant_for_token(&state.config().tenants, &token)
        .map(|tenant_id| Identity { tenant_id })
        .ok_or(AuthError::InvalidToken)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
