//! Server-side state of one open stream.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::encoder;
use crate::sink::{EventSink, SinkError};
use crate::types::{SessionId, StreamEvent, TenantId};

/// Lifecycle state of a stream session.
///
/// `Connecting → Active → Draining → Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Registered, scheduler not yet started.
    Connecting = 0,
    /// Scheduler is ticking.
    Active = 1,
    /// Cancellation observed; no new tick will start.
    Draining = 2,
    /// Removed from the registry and sink closed.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }
}

/// One logical client connection.
///
/// `last_poll_at` is written only by the session's own scheduler; the
/// registry and the sweep only read it.
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    tenant_id: TenantId,
    created_at: DateTime<Utc>,
    last_poll_at: Mutex<DateTime<Utc>>,
    last_emit_at: Mutex<Instant>,
    state: AtomicU8,
    cancellation: CancellationToken,
    sink: EventSink,
}

impl StreamSession {
    /// Create a session in the `Connecting` state.
    ///
    /// `last_poll_at` starts at `created_at`: a new stream only reports
    /// changes made after it was opened.
    pub fn new(
        id: SessionId,
        tenant_id: TenantId,
        created_at: DateTime<Utc>,
        sink: EventSink,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            id,
            tenant_id,
            created_at,
            last_poll_at: Mutex::new(created_at),
            last_emit_at: Mutex::new(Instant::now()),
            state: AtomicU8::new(SessionState::Connecting as u8),
            cancellation,
            sink,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Timestamp the next tick queries from.
    pub fn last_poll_at(&self) -> DateTime<Utc> {
        *self.last_poll_at.lock()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Token cancelled when the session starts closing.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Time since the last frame (of any kind) reached the sink.
    pub fn idle_for(&self) -> Duration {
        self.last_emit_at.lock().elapsed()
    }

    /// Advance the poll cursor. Never moves it backwards.
    pub(crate) fn advance_poll(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last_poll_at.lock();
        if now > *last {
            *last = now;
        }
        *last
    }

    /// `Connecting → Active`. Returns `false` if the session already left
    /// `Connecting` (e.g. it was closed before the scheduler started).
    pub(crate) fn mark_active(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Draining` and cancel the session token.
    ///
    /// Only the first caller wins; every later call returns `false`, which
    /// is what makes closing idempotent.
    pub(crate) fn begin_drain(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Draining as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.cancellation.cancel();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// `Draining → Closed`: close the sink.
    pub(crate) fn finish_close(&self) {
        self.sink.close();
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
    }

    /// Encode and write an event.
    ///
    /// Returns `Ok(false)` when the event could not be encoded (it is logged
    /// and dropped); sink failures are returned to the caller.
    pub async fn emit(&self, event: &StreamEvent) -> Result<bool, SinkError> {
        let Some(frame) = self.encode(event) else {
            return Ok(false);
        };
        self.sink.send(frame).await?;
        self.touch_emit();
        Ok(true)
    }

    /// Write an event only if the buffer has room. Used for best-effort
    /// frames sent while closing.
    pub fn try_emit(&self, event: &StreamEvent) -> Result<bool, SinkError> {
        let Some(frame) = self.encode(event) else {
            return Ok(false);
        };
        self.sink.try_send(frame)?;
        self.touch_emit();
        Ok(true)
    }

    fn encode(&self, event: &StreamEvent) -> Option<Bytes> {
        match encoder::encode(event) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    event_type = event.event_type(),
                    error = %e,
                    "Dropping event that failed to encode"
                );
                None
            }
        }
    }

    fn touch_emit(&self) {
        *self.last_emit_at.lock() = Instant::now();
        trace!(session_id = %self.id, "Frame written to sink");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink;

    fn session() -> (StreamSession, crate::sink::EventReceiver) {
        let token = CancellationToken::new();
        let (sink, rx) = sink::channel(8, token.clone());
        let session = StreamSession::new(
            SessionId::new(),
            TenantId::new("acme"),
            Utc::now(),
            sink,
            token,
        );
        (session, rx)
    }

    #[test]
    fn test_state_transitions() {
        let (session, _rx) = session();
        assert_eq!(session.state(), SessionState::Connecting);

        assert!(session.mark_active());
        assert!(!session.mark_active());
        assert_eq!(session.state(), SessionState::Active);

        assert!(session.begin_drain());
        assert!(session.is_cancelled());
        assert_eq!(session.state(), SessionState::Draining);
        assert!(!session.begin_drain());

        session.finish_close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.begin_drain());
    }

    #[test]
    fn test_drain_from_connecting_blocks_activation() {
        let (session, _rx) = session();
        assert!(session.begin_drain());
        assert!(!session.mark_active());
    }

    #[test]
    fn test_advance_poll_is_monotonic() {
        let (session, _rx) = session();
        let start = session.last_poll_at();
        assert_eq!(start, session.created_at());

        let later = start + chrono::Duration::seconds(5);
        assert_eq!(session.advance_poll(later), later);

        let earlier = start + chrono::Duration::seconds(1);
        assert_eq!(session.advance_poll(earlier), later);
        assert_eq!(session.last_poll_at(), later);
    }

    #[tokio::test]
    async fn test_emit_after_close_is_suppressed() {
        let (session, mut rx) = session();
        let heartbeat = StreamEvent::Heartbeat { emitted_at: Utc::now() };
        assert_eq!(session.emit(&heartbeat).await, Ok(true));

        assert!(session.begin_drain());
        session.finish_close();
        assert_eq!(session.emit(&heartbeat).await, Err(SinkError::Closed));

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_resets_on_emit() {
        let (session, _rx) = session();
        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(session.idle_for(), Duration::from_secs(12));

        session
            .emit(&StreamEvent::Heartbeat { emitted_at: Utc::now() })
            .await
            .unwrap();
        assert_eq!(session.idle_for(), Duration::ZERO);
    }
}
