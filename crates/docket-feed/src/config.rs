//! Timing and sizing knobs for the change feed.

use std::time::Duration;

/// Default interval between two ticks of one session.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default idle time after which a heartbeat is sent.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default maximum lifetime of a stream (1 hour).
pub const DEFAULT_MAX_SESSION_AGE: Duration = Duration::from_secs(60 * 60);

/// Default interval of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default inactivity after which the sweep evicts a session (5 minutes).
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Default maximum number of records a detector returns per tick.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default number of encoded frames buffered per stream.
pub const DEFAULT_SINK_BUFFER: usize = 64;

/// Default maximum number of concurrent streams per tenant.
pub const DEFAULT_MAX_STREAMS_PER_TENANT: usize = 8;

/// Configuration for the change feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Fixed interval between ticks.
    pub poll_interval: Duration,

    /// A tick that emits nothing sends a heartbeat once the stream has been
    /// silent for at least this long.
    pub heartbeat_interval: Duration,

    /// Streams are force-closed after this age, even with an active client.
    pub max_session_age: Duration,

    /// Interval of the process-wide sweep.
    pub sweep_interval: Duration,

    /// Sessions whose last poll is older than this are evicted by the sweep.
    pub stale_after: Duration,

    /// Cap on records returned by one detector call.
    pub page_size: usize,

    /// Encoded frames buffered between the scheduler and the transport.
    pub sink_buffer: usize,

    /// Concurrent streams allowed per tenant.
    pub max_streams_per_tenant: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_session_age: DEFAULT_MAX_SESSION_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            page_size: DEFAULT_PAGE_SIZE,
            sink_buffer: DEFAULT_SINK_BUFFER,
            max_streams_per_tenant: DEFAULT_MAX_STREAMS_PER_TENANT,
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the idle heartbeat threshold.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the maximum session age.
    pub fn with_max_session_age(mut self, age: Duration) -> Self {
        self.max_session_age = age;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the staleness threshold used by the sweep.
    pub fn with_stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = threshold;
        self
    }

    /// Set the per-detector page size (minimum 1).
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Set the sink buffer size (minimum 1).
    pub fn with_sink_buffer(mut self, size: usize) -> Self {
        self.sink_buffer = size.max(1);
        self
    }

    /// Set the per-tenant stream limit.
    pub fn with_max_streams_per_tenant(mut self, limit: usize) -> Self {
        self.max_streams_per_tenant = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.max_session_age, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.stale_after, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_clamps_sizes() {
        let config = FeedConfig::new().with_page_size(0).with_sink_buffer(0);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.sink_buffer, 1);
    }
}
