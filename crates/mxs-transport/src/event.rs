//! # Session Notifications
//!
//! The remote service reports connection progress, statistics and link
//! conditions asynchronously. Each session owns one event channel; the
//! service side holds an [`EventSink`] and the session drains the matching
//! [`EventStream`] on its own thread, so no callback ever runs on a service
//! thread with access to bridge state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::error::TransportError;

// ─── Events ─────────────────────────────────────────────────────────────────

/// Why the initial connection failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    pub code: TransportError,
    /// Free-form detail supplied by the server.
    pub detail: String,
    /// Number of bound network devices that failed to reach the server.
    pub failed_devices: u32,
}

impl ConnectFailure {
    pub fn new(code: TransportError, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            failed_devices: 0,
        }
    }

    pub fn with_failed_devices(mut self, failed_devices: u32) -> Self {
        self.failed_devices = failed_devices;
        self
    }
}

/// Periodic link statistics pushed by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub bytes: u64,
    pub packets: u64,
    pub bitrate_bps: u64,
    pub rtt_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ServerConnected,
    ServerConnectFailed(ConnectFailure),
    /// Receive side: data became available.
    DataReceived,
    Stat(LinkStats),
    Reconnecting,
    Error(TransportError),
    Warning(TransportError),
    StreamParamChanged,
}

impl SessionEvent {
    /// Whether this event settles a pending connection attempt.
    pub fn is_connect_outcome(&self) -> bool {
        matches!(
            self,
            SessionEvent::ServerConnected | SessionEvent::ServerConnectFailed(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::ServerConnected => "server_connected",
            SessionEvent::ServerConnectFailed(_) => "server_connect_failed",
            SessionEvent::DataReceived => "data_received",
            SessionEvent::Stat(_) => "stat",
            SessionEvent::Reconnecting => "reconnecting",
            SessionEvent::Error(_) => "error",
            SessionEvent::Warning(_) => "warning",
            SessionEvent::StreamParamChanged => "stream_param_changed",
        }
    }
}

// ─── Channel ────────────────────────────────────────────────────────────────

/// Create a connected sink/stream pair for one session.
pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = unbounded();
    let closed = Arc::new(AtomicBool::new(false));
    (
        EventSink {
            tx,
            closed: closed.clone(),
        },
        EventStream { rx, closed },
    )
}

/// Service-side handle used to post notifications.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<SessionEvent>,
    /// Set when the stream end is dropped.
    closed: Arc<AtomicBool>,
}

impl EventSink {
    /// Post an event. Returns `false` once the owning session is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Session-side end of the event channel.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<SessionEvent>,
    closed: Arc<AtomicBool>,
}

impl EventStream {
    /// Block up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now, without blocking.
    pub fn drain(&self) -> Vec<SessionEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_reports_closed_stream() {
        let (sink, stream) = event_channel();
        assert!(sink.emit(SessionEvent::DataReceived));
        assert!(!sink.is_closed());
        assert_eq!(stream.drain(), vec![SessionEvent::DataReceived]);
        drop(stream);
        assert!(sink.is_closed());
        assert!(!sink.emit(SessionEvent::Reconnecting));
    }

    #[test]
    fn connect_outcomes() {
        assert!(SessionEvent::ServerConnected.is_connect_outcome());
        let failed = ConnectFailure::new(TransportError::ServiceUnavailable, "down");
        assert!(SessionEvent::ServerConnectFailed(failed).is_connect_outcome());
        assert!(!SessionEvent::Warning(TransportError::Congestion).is_connect_outcome());
        assert_eq!(SessionEvent::Stat(LinkStats::default()).kind(), "stat");
    }
}
