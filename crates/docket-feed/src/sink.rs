//! Output side of a stream session.
//!
//! The sink is a bounded channel of encoded frames. The transport drains the
//! receiving end; the scheduler writes through [`EventSink`]. Once closed, the
//! sink rejects further writes instead of panicking, and a write blocked on a
//! full buffer is abandoned as soon as the session is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receiving end handed to the transport.
pub type EventReceiver = mpsc::Receiver<Bytes>;

/// Error returned by sink writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink was closed by the server.
    #[error("sink is closed")]
    Closed,
    /// The receiving end is gone (client disconnected).
    #[error("client disconnected")]
    Disconnected,
    /// The buffer is full (only for non-blocking writes).
    #[error("sink buffer is full")]
    Full,
}

/// Writing half of a stream.
#[derive(Debug)]
pub struct EventSink {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
    cancellation: CancellationToken,
}

/// Create a sink and its receiver.
///
/// `cancellation` aborts writes waiting on a full buffer.
pub fn channel(buffer: usize, cancellation: CancellationToken) -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let sink = EventSink {
        tx: Mutex::new(Some(tx)),
        closed: AtomicBool::new(false),
        cancellation,
    };
    (sink, rx)
}

impl EventSink {
    fn sender(&self) -> Result<mpsc::Sender<Bytes>, SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        self.tx.lock().clone().ok_or(SinkError::Closed)
    }

    /// Write a frame, waiting for buffer space.
    pub async fn send(&self, frame: Bytes) -> Result<(), SinkError> {
        let tx = self.sender()?;

        let permit = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(SinkError::Closed),
            permit = tx.reserve() => permit.map_err(|_| SinkError::Disconnected)?,
        };

        // Close may have raced with the wait for capacity.
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        permit.send(frame);
        Ok(())
    }

    /// Write a frame only if there is room right now.
    pub fn try_send(&self, frame: Bytes) -> Result<(), SinkError> {
        let tx = self.sender()?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Disconnected,
        })
    }

    /// Close the sink. Returns `true` only for the call that closed it.
    ///
    /// Dropping the sender ends the receiver once buffered frames are drained.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.lock().take();
        true
    }

    /// Whether the sink was closed or the receiver dropped.
    pub fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        self.tx.lock().as_ref().is_none_or(|tx| tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (sink, mut rx) = channel(4, CancellationToken::new());
        sink.send(Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_write_after_close_is_rejected() {
        let (sink, mut rx) = channel(4, CancellationToken::new());
        assert!(sink.close());
        assert!(!sink.close());

        assert_eq!(
            sink.send(Bytes::from_static(b"late")).await,
            Err(SinkError::Closed)
        );
        assert_eq!(sink.try_send(Bytes::from_static(b"late")), Err(SinkError::Closed));
        assert!(sink.is_closed());
        // Receiver sees end of stream.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_disconnect() {
        let (sink, rx) = channel(4, CancellationToken::new());
        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(
            sink.send(Bytes::from_static(b"x")).await,
            Err(SinkError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_full_buffer_write_aborted_by_cancellation() {
        let token = CancellationToken::new();
        let (sink, _rx) = channel(1, token.clone());
        sink.send(Bytes::from_static(b"fill")).await.unwrap();
        assert_eq!(sink.try_send(Bytes::from_static(b"x")), Err(SinkError::Full));

        let blocked = sink.send(Bytes::from_static(b"blocked"));
        token.cancel();
        assert_eq!(blocked.await, Err(SinkError::Closed));
    }
}
