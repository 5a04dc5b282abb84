//! Opening, closing and sweeping stream sessions.
//!
//! Opening a stream creates a session, registers it, starts its scheduler
//! and arms a one-shot max-age timer. A session is closed by whichever of
//! these fires first: transport disconnect (the [`StreamHandle`] is dropped),
//! sink write failure, max age, the stale-session sweep, or shutdown.
//! Closing is idempotent: exactly one caller removes the session from the
//! registry and closes its sink; the session token stops every task tied to
//! the session.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::FeedConfig;
use crate::detector::DetectorSet;
use crate::error::Result;
use crate::registry::StreamRegistry;
use crate::scheduler::{PollScheduler, SchedulerExit};
use crate::session::StreamSession;
use crate::sink::{self, EventReceiver};
use crate::types::{CloseReason, SessionId, StreamEvent, TenantId};

struct Inner {
    registry: StreamRegistry,
    detectors: Arc<DetectorSet>,
    clock: Arc<dyn Clock>,
    config: FeedConfig,
    sweeper: CancellationToken,
}

/// Owns the registry and every per-session task.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("active", &self.inner.registry.len())
            .field("detectors", &self.inner.detectors)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Create a manager using the system clock.
    pub fn new(detectors: DetectorSet, config: FeedConfig) -> Self {
        Self::with_clock(detectors, config, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit clock.
    pub fn with_clock(detectors: DetectorSet, config: FeedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: StreamRegistry::new(),
                detectors: Arc::new(detectors),
                clock,
                config,
                sweeper: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.inner.registry
    }

    /// Number of open streams.
    pub fn active_sessions(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of open streams for one tenant.
    pub fn sessions_for_tenant(&self, tenant: &TenantId) -> usize {
        self.inner.registry.count_for_tenant(tenant)
    }

    /// Open a stream for a tenant.
    ///
    /// The returned handle yields encoded frames, starting with a
    /// `connected` frame. Dropping the handle closes the session.
    pub async fn open(&self, tenant: TenantId) -> Result<StreamHandle> {
        let config = &self.inner.config;
        let now = self.inner.clock.now();
        let id = SessionId::new();
        let token = CancellationToken::new();
        let (sink, receiver) = sink::channel(config.sink_buffer, token.clone());
        let session = Arc::new(StreamSession::new(id, tenant, now, sink, token));

        // The buffer is empty, so this never waits.
        session
            .emit(&StreamEvent::Connected {
                session_id: id,
                emitted_at: now,
            })
            .await?;

        self.inner
            .registry
            .register_bounded(Arc::clone(&session), config.max_streams_per_tenant)?;

        self.spawn_scheduler(Arc::clone(&session));
        self.spawn_max_age_timer(&session);

        info!(
            session_id = %id,
            tenant_id = %session.tenant_id(),
            active = self.inner.registry.len(),
            "Stream opened"
        );

        Ok(StreamHandle {
            session_id: id,
            receiver,
            guard: DisconnectGuard {
                manager: self.clone(),
                session_id: id,
            },
        })
    }

    fn spawn_scheduler(&self, session: Arc<StreamSession>) -> JoinHandle<()> {
        let id = session.id();
        let scheduler = PollScheduler::new(
            session,
            Arc::clone(&self.inner.detectors),
            Arc::clone(&self.inner.clock),
            self.inner.config.clone(),
        );
        let manager = self.clone();

        tokio::spawn(async move {
            if scheduler.run().await == SchedulerExit::SinkFailed {
                manager.close(&id, CloseReason::SinkFailed);
            }
        })
    }

    fn spawn_max_age_timer(&self, session: &StreamSession) -> JoinHandle<()> {
        let id = session.id();
        let token = session.cancellation().clone();
        let max_age = self.inner.config.max_session_age;
        let manager = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(max_age) => {
                    manager.expire(&id);
                }
            }
        })
    }

    /// Close a session. Returns `true` only for the call that actually
    /// closed it; repeated or concurrent calls are no-ops.
    pub fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(session) = self.inner.registry.get(id) else {
            return false;
        };
        if !session.begin_drain() {
            return false;
        }

        if self.inner.registry.remove(id).is_none() {
            error!(session_id = %id, "Draining session vanished from registry");
        }
        session.finish_close();

        let age = self.inner.clock.now() - session.created_at();
        info!(
            session_id = %id,
            tenant_id = %session.tenant_id(),
            reason = %reason,
            age_secs = age.num_seconds(),
            active = self.inner.registry.len(),
            "Stream closed"
        );
        true
    }

    /// Force-close a session that reached its maximum age, sending a
    /// best-effort `closing` frame first.
    pub fn expire(&self, id: &SessionId) -> bool {
        let Some(session) = self.inner.registry.get(id) else {
            return false;
        };
        if session.is_cancelled() {
            return false;
        }

        let closing = StreamEvent::Closing {
            reason: CloseReason::MaxAge,
            emitted_at: self.inner.clock.now(),
        };
        if let Err(e) = session.try_emit(&closing) {
            debug!(session_id = %id, error = %e, "Closing frame not delivered");
        }
        self.close(id, CloseReason::MaxAge)
    }

    /// Evict sessions whose last poll is older than the staleness threshold.
    ///
    /// The registry is snapshotted under its lock; staleness checks and
    /// closes happen outside it.
    pub fn sweep_once(&self) -> Vec<SessionId> {
        let now = self.inner.clock.now();
        let threshold = chrono::Duration::from_std(self.inner.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        let stale: Vec<SessionId> = self
            .inner
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| now - s.last_poll_at() > threshold)
            .map(|s| s.id())
            .collect();

        let evicted: Vec<SessionId> = stale
            .into_iter()
            .filter(|id| self.close(id, CloseReason::Stale))
            .collect();

        if !evicted.is_empty() {
            warn!(count = evicted.len(), "Sweep evicted stale stream sessions");
        }
        evicted
    }

    /// Start the process-wide sweep task.
    ///
    /// Runs every `sweep_interval` until [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let token = self.inner.sweeper.clone();
        let period = self.inner.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?period, "Stream sweeper started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep_once();
                    }
                }
            }
            debug!("Stream sweeper stopped");
        })
    }

    /// Stop the sweeper and close every open session.
    pub fn shutdown(&self) -> usize {
        self.inner.sweeper.cancel();
        let closed = self
            .inner
            .registry
            .snapshot()
            .iter()
            .filter(|s| self.close(&s.id(), CloseReason::Shutdown))
            .count();
        info!(closed, "Stream feed shut down");
        closed
    }
}

/// Closes its session with [`CloseReason::Disconnect`] when dropped.
#[derive(Debug)]
struct DisconnectGuard {
    manager: LifecycleManager,
    session_id: SessionId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.manager
            .close(&self.session_id, CloseReason::Disconnect);
    }
}

/// Transport-facing end of an open stream.
#[derive(Debug)]
pub struct StreamHandle {
    session_id: SessionId,
    receiver: EventReceiver,
    guard: DisconnectGuard,
}

impl StreamHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next encoded frame, or `None` once the session is closed and all
    /// buffered frames were delivered.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Explicitly close the stream as a client disconnect.
    pub fn disconnect(self) -> bool {
        let closed = self
            .guard
            .manager
            .close(&self.session_id, CloseReason::Disconnect);
        drop(self);
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::detector::{ChangeDetector, DetectorError};
    use crate::encoder::{DecodedFrame, decode_frame};
    use crate::error::Error;
    use crate::session::SessionState;
    use crate::types::{ChangedRecord, Domain};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Rows(Arc<Mutex<Vec<ChangedRecord>>>);

    struct RowsDetector {
        domain: Domain,
        rows: Rows,
    }

    #[async_trait]
    impl ChangeDetector for RowsDetector {
        fn domain(&self) -> Domain {
            self.domain
        }

        async fn detect(
            &self,
            tenant: &TenantId,
            since: DateTime<Utc>,
            limit: usize,
        ) -> std::result::Result<Vec<ChangedRecord>, DetectorError> {
            let mut rows: Vec<_> = self
                .rows
                .0
                .lock()
                .iter()
                .filter(|r| &r.tenant_id == tenant && r.changed_at > since)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
            rows.truncate(limit);
            Ok(rows)
        }
    }

    fn manager(config: FeedConfig) -> (LifecycleManager, Rows, Arc<MonotonicClock>) {
        let rows = Rows::default();
        let clock = Arc::new(MonotonicClock::new());
        let detectors = DetectorSet::new().with(RowsDetector {
            domain: Domain::Message,
            rows: rows.clone(),
        });
        let manager = LifecycleManager::with_clock(detectors, config, clock.clone());
        (manager, rows, clock)
    }

    fn decode(bytes: Bytes) -> DecodedFrame {
        decode_frame(std::str::from_utf8(&bytes).unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_sends_connected_and_registers() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let mut handle = manager.open(TenantId::new("acme")).await.unwrap();

        let frame = decode(handle.recv().await.unwrap());
        assert_eq!(frame.event, "connected");
        assert_eq!(
            frame.payload().unwrap()["session_id"],
            handle.session_id().to_string()
        );
        assert!(manager.registry().contains(&handle.session_id()));
        assert_eq!(manager.sessions_for_tenant(&TenantId::new("acme")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_delivered_once_across_ticks() {
        let (manager, rows, clock) = manager(FeedConfig::default());
        let mut handle = manager.open(TenantId::new("acme")).await.unwrap();
        assert_eq!(decode(handle.recv().await.unwrap()).event, "connected");

        tokio::time::sleep(Duration::from_secs(2)).await;
        rows.0
            .lock()
            .push(ChangedRecord::new("m-1", TenantId::new("acme"), clock.now()));

        // First tick at t=5s.
        let frame = decode(handle.recv().await.unwrap());
        assert_eq!(frame.event, "message");
        assert_eq!(frame.payload().unwrap()[0]["id"], "m-1");

        // Nothing until the idle heartbeat at t=35s (30s after the message).
        let next = tokio::time::timeout(Duration::from_secs(29), handle.recv()).await;
        assert!(next.is_err(), "no duplicate delivery on later ticks");
        let frame = decode(handle.recv().await.unwrap());
        assert_eq!(frame.event, "heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_heartbeat_in_first_35_seconds() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let mut handle = manager.open(TenantId::new("acme")).await.unwrap();
        let start = Instant::now();
        assert_eq!(decode(handle.recv().await.unwrap()).event, "connected");

        let frame = decode(handle.recv().await.unwrap());
        assert_eq!(frame.event, "heartbeat");
        assert!(start.elapsed() >= Duration::from_secs(30));

        let next = tokio::time::timeout(Duration::from_secs(5), handle.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age_force_closes_active_stream() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let mut handle = manager.open(TenantId::new("acme")).await.unwrap();
        let id = handle.session_id();

        let mut last = None;
        while let Some(bytes) = handle.recv().await {
            last = Some(decode(bytes));
        }

        let last = last.unwrap();
        assert_eq!(last.event, "closing");
        assert_eq!(last.payload().unwrap()["reason"], "max_age");
        assert!(!manager.registry().contains(&id));
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let handle = manager.open(TenantId::new("acme")).await.unwrap();
        let id = handle.session_id();
        let session = manager.registry().get(&id).unwrap();

        assert!(manager.close(&id, CloseReason::Disconnect));
        assert!(!manager.close(&id, CloseReason::MaxAge));
        assert!(!manager.expire(&id));
        assert_eq!(session.state(), SessionState::Closed);

        // Dropping the handle after close is a no-op too.
        drop(handle);
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_disconnect_and_max_age_close_once() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let _bystander = manager.open(TenantId::new("acme")).await.unwrap();

        for _ in 0..100 {
            let handle = manager.open(TenantId::new("acme")).await.unwrap();
            let id = handle.session_id();
            let before = manager.active_sessions();
            let barrier = std::sync::Barrier::new(2);

            let (expired, disconnected) = std::thread::scope(|scope| {
                let expiry = scope.spawn(|| {
                    barrier.wait();
                    manager.expire(&id)
                });
                let disconnect = scope.spawn(|| {
                    barrier.wait();
                    manager.close(&id, CloseReason::Disconnect)
                });
                (expiry.join().unwrap(), disconnect.join().unwrap())
            });

            assert!(expired ^ disconnected, "exactly one close must win");
            assert_eq!(manager.active_sessions(), before - 1);
            drop(handle);
            assert_eq!(manager.active_sessions(), before - 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_closes_session() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let handle = manager.open(TenantId::new("acme")).await.unwrap();
        let id = handle.session_id();
        let session = manager.registry().get(&id).unwrap();

        drop(handle);
        assert!(!manager.registry().contains(&id));
        assert!(session.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_returns_true_once() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let handle = manager.open(TenantId::new("acme")).await.unwrap();
        assert!(handle.disconnect());
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_closes_session() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let handle = manager.open(TenantId::new("acme")).await.unwrap();
        let id = handle.session_id();
        let session = manager.registry().get(&id).unwrap();

        // Drop only the receiver so the guard does not close the session.
        let StreamHandle {
            receiver, guard, ..
        } = handle;
        drop(receiver);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!manager.registry().contains(&id));
        assert_eq!(session.state(), SessionState::Closed);
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_sessions() {
        let config = FeedConfig::default().with_poll_interval(Duration::from_secs(3600));
        let (manager, _rows, clock) = manager(config);

        let stale = manager.open(TenantId::new("acme")).await.unwrap();
        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        let fresh = manager.open(TenantId::new("acme")).await.unwrap();
        tokio::time::advance(Duration::from_secs(61 + 60)).await;

        // Neither session has ticked: stale is 6m01s old, fresh 2m01s.
        assert!(clock.now() - last_poll(&manager, &stale) > chrono::Duration::minutes(5));
        let evicted = manager.sweep_once();
        assert_eq!(evicted, vec![stale.session_id()]);
        assert!(manager.registry().contains(&fresh.session_id()));
        assert!(!manager.registry().contains(&stale.session_id()));
    }

    fn last_poll(manager: &LifecycleManager, handle: &StreamHandle) -> DateTime<Utc> {
        manager
            .registry()
            .get(&handle.session_id())
            .unwrap()
            .last_poll_at()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_periodically() {
        let config = FeedConfig::default()
            .with_poll_interval(Duration::from_secs(3600))
            .with_max_session_age(Duration::from_secs(7200));
        let (manager, _rows, _clock) = manager(config);
        let sweeper = manager.spawn_sweeper();

        let handle = manager.open(TenantId::new("acme")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6 * 60 + 1)).await;
        assert!(!manager.registry().contains(&handle.session_id()));

        manager.shutdown();
        sweeper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tenants_are_isolated() {
        let (manager, rows, clock) = manager(FeedConfig::default());
        let mut acme = manager.open(TenantId::new("acme")).await.unwrap();
        let mut globex = manager.open(TenantId::new("globex")).await.unwrap();
        acme.recv().await.unwrap();
        globex.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        {
            let mut rows = rows.0.lock();
            rows.push(ChangedRecord::new("acme-1", TenantId::new("acme"), clock.now()));
            rows.push(ChangedRecord::new("globex-1", TenantId::new("globex"), clock.now()));
        }

        let a = decode(acme.recv().await.unwrap());
        let g = decode(globex.recv().await.unwrap());
        let a_items = a.payload().unwrap().as_array().unwrap();
        let g_items = g.payload().unwrap().as_array().unwrap();
        assert_eq!(a_items.len(), 1);
        assert_eq!(a_items[0]["id"], "acme-1");
        assert_eq!(g_items.len(), 1);
        assert_eq!(g_items[0]["id"], "globex-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tenant_stream_limit() {
        let config = FeedConfig::default().with_max_streams_per_tenant(1);
        let (manager, _rows, _clock) = manager(config);
        let _first = manager.open(TenantId::new("acme")).await.unwrap();

        let err = manager.open(TenantId::new("acme")).await.unwrap_err();
        assert!(matches!(err, Error::TenantLimit { limit: 1, .. }));
        assert_eq!(manager.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_everything() {
        let (manager, _rows, _clock) = manager(FeedConfig::default());
        let mut a = manager.open(TenantId::new("acme")).await.unwrap();
        let _b = manager.open(TenantId::new("globex")).await.unwrap();

        assert_eq!(manager.shutdown(), 2);
        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(decode(a.recv().await.unwrap()).event, "connected");
        assert!(a.recv().await.is_none());
    }
}
