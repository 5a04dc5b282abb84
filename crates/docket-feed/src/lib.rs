//! Real-time change feed for the Docket client portal.
//!
//! This crate multiplexes per-tenant change detection onto long-lived
//! client streams:
//! - Change detectors query one data domain for rows changed after a cursor
//! - Each stream session runs its own poll scheduler with a heartbeat
//! - A process-wide registry tracks open sessions; a sweep evicts stale ones
//! - Events are encoded as Server-Sent Events frames
//!
//! The crate is transport-agnostic: an HTTP layer opens a stream with
//! [`LifecycleManager::open`] and forwards the frames a [`StreamHandle`]
//! yields. Dropping the handle closes the session.
//!
//! # Example
//!
//! ```rust,ignore
//! use docket_feed::{DetectorSet, FeedConfig, LifecycleManager, TenantId};
//!
//! let feed = LifecycleManager::new(detectors, FeedConfig::default());
//! let _sweeper = feed.spawn_sweeper();
//!
//! let mut stream = feed.open(TenantId::new("acme")).await?;
//! while let Some(frame) = stream.recv().await {
//!     write(frame).await?;
//! }
//! ```

mod clock;
mod config;
mod detector;
pub mod encoder;
mod error;
mod lifecycle;
mod registry;
mod scheduler;
mod session;
mod sink;
mod types;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use config::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_SESSION_AGE, DEFAULT_MAX_STREAMS_PER_TENANT,
    DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL, DEFAULT_SINK_BUFFER, DEFAULT_STALE_AFTER,
    DEFAULT_SWEEP_INTERVAL, FeedConfig,
};
pub use detector::{ChangeDetector, DetectorError, DetectorSet};
pub use encoder::{DecodedFrame, EncodeError, decode_frame, decode_frames, encode};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleManager, StreamHandle};
pub use registry::StreamRegistry;
pub use scheduler::{PollScheduler, SchedulerExit, TickReport};
pub use session::{SessionState, StreamSession};
pub use sink::{EventReceiver, EventSink, SinkError, channel as sink_channel};
pub use types::{ChangeEvent, ChangedRecord, CloseReason, Domain, SessionId, StreamEvent, TenantId};
