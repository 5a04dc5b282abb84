//! Per-session poll loop.
//!
//! Each open stream gets its own scheduler task. A tick runs every detector
//! in domain order against the session's `last_poll_at`, emits one change
//! event per non-empty domain, sends a heartbeat if the stream has been idle
//! long enough, and finally advances `last_poll_at`. Ticks of one session
//! never overlap; sessions never wait on each other.
//!
//! The cursor moves to the clock reading taken *before* the first detector
//! query, so a row committed while the tick is running is still newer than
//! the cursor and is picked up by the next tick. Rows this tick delivered
//! that are also newer than the cursor are remembered for one tick and not
//! sent again.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::config::FeedConfig;
use crate::detector::DetectorSet;
use crate::session::StreamSession;
use crate::types::{ChangeEvent, Domain, StreamEvent};

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Domains that produced a change event, in emission order.
    pub emitted: Vec<Domain>,
    /// Total records delivered.
    pub records: usize,
    /// Whether a heartbeat was sent.
    pub heartbeat: bool,
    /// Domains whose detector failed this tick.
    pub failed: Vec<Domain>,
    /// Whether writing to the client failed.
    pub sink_failed: bool,
    /// Cursor after the tick.
    pub polled_to: Option<DateTime<Utc>>,
}

/// Why a scheduler loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// The session was cancelled (closed by someone else).
    Cancelled,
    /// A write to the client failed; the session must be closed.
    SinkFailed,
}

/// A delivered row: domain, id and the change time it was delivered for.
type DeliveredKey = (Domain, String, DateTime<Utc>);

/// Poll loop for one session.
pub struct PollScheduler {
    session: Arc<StreamSession>,
    detectors: Arc<DetectorSet>,
    clock: Arc<dyn Clock>,
    config: FeedConfig,
    /// Rows sent last tick whose change time is after the current cursor.
    carried: Mutex<HashSet<DeliveredKey>>,
}

impl PollScheduler {
    pub fn new(
        session: Arc<StreamSession>,
        detectors: Arc<DetectorSet>,
        clock: Arc<dyn Clock>,
        config: FeedConfig,
    ) -> Self {
        Self {
            session,
            detectors,
            clock,
            config,
            carried: Mutex::new(HashSet::new()),
        }
    }

    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Run ticks every `poll_interval` until the session is cancelled or the
    /// sink fails. The first tick fires one interval after start.
    pub async fn run(self) -> SchedulerExit {
        let token = self.session.cancellation().clone();
        if !self.session.mark_active() {
            return SchedulerExit::Cancelled;
        }

        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(session_id = %self.session.id(), ?period, "Poll scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(session_id = %self.session.id(), "Poll scheduler cancelled");
                    return SchedulerExit::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            let report = self.tick().await;
            if report.sink_failed {
                return SchedulerExit::SinkFailed;
            }
        }
    }

    /// Run a single poll cycle.
    pub async fn tick(&self) -> TickReport {
        let session = &self.session;
        let tenant = session.tenant_id();
        let since = session.last_poll_at();
        let tick_started = self.clock.now();
        let carried = std::mem::take(&mut *self.carried.lock());
        let mut delivered = HashSet::new();
        let mut report = TickReport::default();

        for detector in self.detectors.iter() {
            let domain = detector.domain();

            let records = match detector.detect(tenant, since, self.config.page_size).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(
                        session_id = %session.id(),
                        tenant_id = %tenant,
                        domain = %domain,
                        error = %e,
                        "Change detector failed, skipping domain this tick"
                    );
                    report.failed.push(domain);
                    continue;
                }
            };

            // Guard the detector contract: tenant scope, strict `> since`, page cap.
            let items: Vec<_> = records
                .into_iter()
                .filter(|r| &r.tenant_id == tenant && r.changed_at > since)
                .filter(|r| !carried.contains(&(domain, r.id.clone(), r.changed_at)))
                .take(self.config.page_size)
                .collect();
            if items.is_empty() {
                continue;
            }

            let count = items.len();
            let keys: Vec<DeliveredKey> = items
                .iter()
                .filter(|r| r.changed_at > tick_started)
                .map(|r| (domain, r.id.clone(), r.changed_at))
                .collect();
            let event = StreamEvent::Change(ChangeEvent {
                domain,
                items,
                emitted_at: self.clock.now(),
            });

            match session.emit(&event).await {
                Ok(true) => {
                    trace!(session_id = %session.id(), domain = %domain, count, "Change event emitted");
                    report.emitted.push(domain);
                    report.records += count;
                    delivered.extend(keys);
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(session_id = %session.id(), error = %e, "Sink write failed");
                    report.sink_failed = true;
                    break;
                }
            }
        }

        if !report.sink_failed
            && report.emitted.is_empty()
            && session.idle_for() >= self.config.heartbeat_interval
        {
            let heartbeat = StreamEvent::Heartbeat {
                emitted_at: self.clock.now(),
            };
            match session.emit(&heartbeat).await {
                Ok(sent) => report.heartbeat = sent,
                Err(e) => {
                    debug!(session_id = %session.id(), error = %e, "Heartbeat write failed");
                    report.sink_failed = true;
                }
            }
        }

        // Advance regardless of detector errors so a broken domain cannot
        // pin the cursor.
        let polled_to = session.advance_poll(tick_started);
        delivered.retain(|(_, _, changed_at)| *changed_at > polled_to);
        *self.carried.lock() = delivered;
        report.polled_to = Some(polled_to);
        report
    }
}
