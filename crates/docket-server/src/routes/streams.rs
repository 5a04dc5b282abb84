//! Change stream endpoints.
//!
//! `GET /api/v1/stream` holds the connection open and writes one
//! Server-Sent Events frame per feed event. The stream ends when the
//! server closes the session (max age, shutdown); when the client goes
//! away, the response body is dropped, which closes the session.

use std::convert::Infallible;

use axum::{
    Extension, Json,
    body::Body,
    extract::State,
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::Response,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::Identity;
use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Response header carrying the new stream's session id.
pub const STREAM_SESSION_HEADER: &str = "x-stream-session";

/// Open a change stream for the authenticated tenant.
pub async fn stream_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    let mut handle = state.feed.open(identity.tenant_id.clone()).await?;
    let session_id = handle.session_id();
    debug!(session_id = %session_id, tenant_id = %identity.tenant_id, "Streaming to client");

    let frames = async_stream::stream! {
        while let Some(frame) = handle.recv().await {
            yield Ok::<Bytes, Infallible>(frame);
        }
    };

    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .header(STREAM_SESSION_HEADER, session_id.to_string())
        .body(Body::from_stream(frames))
        .map_err(|e| ServerError::Internal(format!("Failed to build stream response: {}", e)))
}

/// Open stream count for the caller's tenant.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamCountResponse {
    pub tenant_id: String,
    pub active: usize,
}

/// List the caller's open streams.
pub async fn list_streams_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Json<StreamCountResponse> {
    Json(StreamCountResponse {
        active: state.feed.sessions_for_tenant(&identity.tenant_id),
        tenant_id: identity.tenant_id.to_string(),
    })
}
