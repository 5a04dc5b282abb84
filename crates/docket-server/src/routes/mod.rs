//! API routes.

pub mod health;
pub mod streams;

pub use health::{HealthResponse, health_routes};
pub use streams::{StreamCountResponse, list_streams_handler, stream_handler};
