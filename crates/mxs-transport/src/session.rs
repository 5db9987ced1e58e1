//! # Transport Session
//!
//! Wraps one service handle and tracks its connection lifecycle:
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──ServerConnected──▶ Connected ──close──▶ Closed
//!                        │                               │
//!              ServerConnectFailed / timeout     ServerConnectFailed
//!                        ▼                               ▼
//!                      Failed ◀──────────────────────────┘
//! ```
//!
//! `Failed` is terminal: the handle is kept until the owner calls `close`,
//! and a new session is needed to try again.
//!
//! Notifications are applied on whatever thread calls into the session;
//! nothing is ever invoked on a service thread. `close` releases the handle
//! and is idempotent; dropping a session closes it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::error::TransportError;
use crate::event::{event_channel, ConnectFailure, EventStream, SessionEvent};
use crate::params::{Role, StreamParams};
use crate::service::{ReceiverHandle, SenderHandle, Service, Waker};

/// Extra wait on top of the configured connect timeout before giving up.
pub const CONNECT_GRACE: Duration = Duration::from_secs(1);

/// Notifications kept for [`Session::take_events`] before the oldest are discarded.
const PENDING_EVENT_LIMIT: usize = 256;

// ─── Identity ───────────────────────────────────────────────────────────────

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no handle yet.
    Idle,
    /// Handle created, waiting for the server's verdict.
    Connecting,
    Connected,
    /// Server refused or never answered. The handle stays until `close`.
    Failed,
    /// Closed by the owner. Terminal.
    Closed,
}

enum Handle {
    Sender(Box<dyn SenderHandle>),
    Receiver(Box<dyn ReceiverHandle>),
}

// ─── Session ────────────────────────────────────────────────────────────────

pub struct Session {
    id: SessionId,
    role: Role,
    params: StreamParams,
    state: ConnectionState,
    handle: Option<Handle>,
    events: Option<EventStream>,
    /// Notifications not yet taken by the owner.
    pending: Vec<SessionEvent>,
    failure: Option<ConnectFailure>,
    /// Whether a selector waker is installed on the handle.
    selected: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("stream_key", &self.params.stream_key)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// A session in `Idle` state. Call [`connect`](Self::connect) to start it.
    pub fn new(params: StreamParams, role: Role) -> Self {
        Self {
            id: SessionId::next(),
            role,
            params,
            state: ConnectionState::Idle,
            handle: None,
            events: None,
            pending: Vec::new(),
            failure: None,
            selected: false,
        }
    }

    /// Create a session and start connecting it.
    pub fn open(
        service: &dyn Service,
        params: StreamParams,
        role: Role,
    ) -> Result<Self, TransportError> {
        let mut session = Session::new(params, role);
        session.connect(service)?;
        Ok(session)
    }

    /// Create the service handle. Only allowed from `Idle`.
    pub fn connect(&mut self, service: &dyn Service) -> Result<(), TransportError> {
        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Closed => return Err(TransportError::NotFound),
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Failed => return Err(TransportError::InvalidArgs),
        }
        self.params.validate()?;
        self.params.net_devices = self.params.unique_devices();

        let (sink, stream) = event_channel();
        let handle = match self.role {
            Role::Sender => Handle::Sender(service.create_sender(&self.params, sink)?),
            Role::Receiver => Handle::Receiver(service.create_receiver(&self.params, sink)?),
        };
        self.handle = Some(handle);
        self.events = Some(stream);
        self.failure = None;
        self.state = ConnectionState::Connecting;
        info!(
            session = %self.id,
            role = ?self.role,
            server = %self.params.server_url,
            stream = %self.params.stream_key,
            devices = self.params.net_devices.len(),
            "session connecting"
        );
        Ok(())
    }

    /// Block until the server accepts or refuses the connection, at most
    /// `connect_timeout` plus [`CONNECT_GRACE`]. Silence is treated as a
    /// refusal with `ServiceUnavailable`.
    pub fn wait_connected(&mut self) -> Result<(), ConnectFailure> {
        let deadline = Instant::now() + self.params.connect_timeout + CONNECT_GRACE;
        loop {
            match self.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => {
                    return Err(self.failure.clone().unwrap_or_else(|| {
                        ConnectFailure::new(TransportError::ServiceUnavailable, "connect failed")
                    }))
                }
                ConnectionState::Closed => {
                    return Err(ConnectFailure::new(TransportError::NotFound, "session closed"))
                }
                ConnectionState::Idle => {
                    return Err(ConnectFailure::new(
                        TransportError::InvalidArgs,
                        "session not started",
                    ))
                }
                ConnectionState::Connecting => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.fail(ConnectFailure::new(
                    TransportError::ServiceUnavailable,
                    format!(
                        "no connect notification within {} ms",
                        (self.params.connect_timeout + CONNECT_GRACE).as_millis()
                    ),
                ));
                continue;
            }
            let event = self
                .events
                .as_ref()
                .and_then(|events| events.recv_timeout(deadline - now));
            if let Some(event) = event {
                self.apply(event);
            }
        }
    }

    /// Apply queued notifications without blocking.
    pub fn poll_events(&mut self) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        for event in events.drain() {
            self.apply(event);
        }
    }

    /// Notifications received since the last call (oldest first).
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.poll_events();
        std::mem::take(&mut self.pending)
    }

    /// Send one packet. Fails with `ServiceUnavailable` until connected.
    pub fn send(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        self.poll_events();
        self.check_usable(Role::Sender)?;
        match self.handle.as_mut() {
            Some(Handle::Sender(h)) => h.send(data, timeout),
            _ => Err(TransportError::InvalidArgs),
        }
    }

    /// Receive one packet into `buf`. See [`ReceiverHandle::receive`].
    pub fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.poll_events();
        self.check_usable(Role::Receiver)?;
        match self.handle.as_mut() {
            Some(Handle::Receiver(h)) => h.receive(buf, timeout),
            _ => Err(TransportError::InvalidArgs),
        }
    }

    /// Release the handle. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.detach_waker();
        self.handle = None;
        self.events = None;
        self.pending.clear();
        self.state = ConnectionState::Closed;
        info!(session = %self.id, stream = %self.params.stream_key, "session closed");
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Why the last connect attempt failed, if it did.
    pub fn failure(&self) -> Option<&ConnectFailure> {
        self.failure.as_ref()
    }

    // ── Selector hooks ──

    pub(crate) fn attach_waker(&mut self, waker: Waker) -> Result<(), TransportError> {
        if self.state == ConnectionState::Closed {
            return Err(TransportError::NotFound);
        }
        match self.handle.as_mut() {
            Some(Handle::Receiver(h)) => {
                h.set_waker(Some(waker));
                self.selected = true;
                Ok(())
            }
            _ => Err(TransportError::InvalidArgs),
        }
    }

    pub(crate) fn detach_waker(&mut self) {
        if !self.selected {
            return;
        }
        if let Some(Handle::Receiver(h)) = self.handle.as_mut() {
            h.set_waker(None);
        }
        self.selected = false;
    }

    // ── Internals ──

    fn check_usable(&self, role: Role) -> Result<(), TransportError> {
        if self.state == ConnectionState::Closed {
            return Err(TransportError::NotFound);
        }
        if self.role != role {
            return Err(TransportError::InvalidArgs);
        }
        if self.state != ConnectionState::Connected {
            return Err(TransportError::ServiceUnavailable);
        }
        Ok(())
    }

    fn fail(&mut self, failure: ConnectFailure) {
        error!(
            target: "mxs::events",
            session = %self.id,
            code = %failure.code,
            detail = %failure.detail,
            failed_devices = failure.failed_devices,
            "server connect failed"
        );
        self.failure = Some(failure);
        self.state = ConnectionState::Failed;
    }

    fn apply(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::ServerConnected => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    info!(target: "mxs::events", session = %self.id, "server connected");
                }
                return;
            }
            SessionEvent::ServerConnectFailed(failure) => {
                if matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    self.fail(failure.clone());
                }
                return;
            }
            SessionEvent::DataReceived => trace!(target: "mxs::events", session = %self.id, "data received"),
            SessionEvent::Stat(stats) => debug!(
                target: "mxs::events",
                session = %self.id,
                bytes = stats.bytes,
                packets = stats.packets,
                bitrate_bps = stats.bitrate_bps,
                rtt_ms = stats.rtt_ms,
                "link stats"
            ),
            SessionEvent::Reconnecting => warn!(target: "mxs::events", session = %self.id, "reconnecting"),
            SessionEvent::Error(code) => {
                error!(target: "mxs::events", session = %self.id, code = %code, "service error")
            }
            SessionEvent::Warning(code) => {
                warn!(target: "mxs::events", session = %self.id, code = %code, "service warning")
            }
            SessionEvent::StreamParamChanged => {
                info!(target: "mxs::events", session = %self.id, "stream parameters changed")
            }
        }
        if self.pending.len() >= PENDING_EVENT_LIMIT {
            self.pending.remove(0);
        }
        self.pending.push(event);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
