//! # In-Process Service
//!
//! A [`Service`] that keeps every stream inside the current process. Senders
//! and receivers that share a stream key are connected through per-receiver
//! inboxes. Connection is asynchronous (a short-lived thread posts the
//! outcome after `connect_delay`) so callers exercise the same wait path as
//! with a remote server.
//!
//! The service also exposes fault hooks used by the test suites and the demo
//! binary: connect rejections, service-unavailable windows, injected
//! notifications and injected packets.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};

use super::{ReceiverHandle, SenderHandle, Service, Waker};
use crate::error::{TransportError, MAX_PACKET_SIZE};
use crate::event::{ConnectFailure, EventSink, SessionEvent};
use crate::params::StreamParams;

// ─── Config ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemoryServiceConfig {
    /// Delay before the connect outcome is posted.
    pub connect_delay: Duration,
    /// Packets a receiver inbox holds before senders get `Again`.
    pub inbox_capacity: usize,
    pub max_packet_size: usize,
}

impl Default for MemoryServiceConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(10),
            inbox_capacity: 4096,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

// ─── Hub ────────────────────────────────────────────────────────────────────

struct Hub {
    config: MemoryServiceConfig,
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<String, Channel>,
    rejections: HashMap<String, ConnectFailure>,
    unavailable: HashSet<String>,
}

/// Everything connected under one stream key.
#[derive(Default)]
struct Channel {
    inboxes: Vec<Arc<Inbox>>,
    listeners: Vec<EventSink>,
}

impl Hub {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_unavailable(&self, key: &str) -> bool {
        self.lock().unavailable.contains(key)
    }
}

struct Inbox {
    state: Mutex<InboxState>,
    readable: Condvar,
    closed: AtomicBool,
}

struct InboxState {
    packets: VecDeque<Bytes>,
    waker: Option<Waker>,
    events: EventSink,
}

impl Inbox {
    fn new(events: EventSink) -> Self {
        Self {
            state: Mutex::new(InboxState {
                packets: VecDeque::new(),
                waker: None,
                events,
            }),
            readable: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn len(&self) -> usize {
        self.lock().packets.len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a packet. Readiness is signalled only on the empty → non-empty edge.
    fn push(&self, packet: Bytes) {
        let mut st = self.lock();
        let was_empty = st.packets.is_empty();
        st.packets.push_back(packet);
        if was_empty {
            if let Some(waker) = &st.waker {
                waker.wake();
            }
            st.events.emit(SessionEvent::DataReceived);
        }
        drop(st);
        self.readable.notify_one();
    }
}

// ─── Service ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MemoryService {
    hub: Arc<Hub>,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    pub fn new() -> Self {
        Self::with_config(MemoryServiceConfig::default())
    }

    pub fn with_config(config: MemoryServiceConfig) -> Self {
        Self {
            hub: Arc::new(Hub {
                config,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    /// Fail every future connect on `stream_key` with `failure`.
    pub fn reject(&self, stream_key: &str, failure: ConnectFailure) {
        self.hub
            .lock()
            .rejections
            .insert(stream_key.to_string(), failure);
    }

    pub fn accept(&self, stream_key: &str) {
        self.hub.lock().rejections.remove(stream_key);
    }

    /// While set, send and receive on `stream_key` fail with `ServiceUnavailable`.
    pub fn set_unavailable(&self, stream_key: &str, unavailable: bool) {
        let mut state = self.hub.lock();
        if unavailable {
            state.unavailable.insert(stream_key.to_string());
        } else {
            state.unavailable.remove(stream_key);
        }
    }

    /// Post `event` to every connected session on `stream_key`. Returns how
    /// many sessions received it.
    pub fn notify(&self, stream_key: &str, event: SessionEvent) -> usize {
        let mut state = self.hub.lock();
        let Some(channel) = state.channels.get_mut(stream_key) else {
            return 0;
        };
        channel.listeners.retain(|l| !l.is_closed());
        channel
            .listeners
            .iter()
            .filter(|l| l.emit(event.clone()))
            .count()
    }

    /// Deliver a raw packet to every receiver on `stream_key`, bypassing the
    /// sender-side size limit and inbox capacity.
    pub fn inject(&self, stream_key: &str, packet: &[u8]) -> usize {
        let mut state = self.hub.lock();
        let Some(channel) = state.channels.get_mut(stream_key) else {
            return 0;
        };
        channel.inboxes.retain(|i| !i.is_closed());
        let packet = Bytes::copy_from_slice(packet);
        for inbox in &channel.inboxes {
            inbox.push(packet.clone());
        }
        channel.inboxes.len()
    }

    /// Live, connected receivers on `stream_key`.
    pub fn receiver_count(&self, stream_key: &str) -> usize {
        self.hub
            .lock()
            .channels
            .get(stream_key)
            .map(|c| c.inboxes.iter().filter(|i| !i.is_closed()).count())
            .unwrap_or(0)
    }

    fn spawn_connect<F>(
        &self,
        key: String,
        events: EventSink,
        cancelled: impl Fn() -> bool + Send + 'static,
        on_connect: F,
    ) -> Result<(), TransportError>
    where
        F: FnOnce(&mut Channel) + Send + 'static,
    {
        let hub = self.hub.clone();
        thread::Builder::new()
            .name("mxs-mem-connect".into())
            .spawn(move || {
                thread::sleep(hub.config.connect_delay);
                if cancelled() {
                    trace!(stream = %key, "connect abandoned, handle closed");
                    return;
                }
                let mut state = hub.lock();
                if let Some(failure) = state.rejections.get(&key).cloned() {
                    drop(state);
                    debug!(stream = %key, code = %failure.code, "rejecting connect");
                    events.emit(SessionEvent::ServerConnectFailed(failure));
                    return;
                }
                let channel = state.channels.entry(key).or_default();
                on_connect(channel);
                // Posted under the hub lock so it precedes any DataReceived.
                events.emit(SessionEvent::ServerConnected);
                channel.listeners.push(events);
            })
            .map(|_| ())
            .map_err(|_| TransportError::NoMem)
    }
}

impl Service for MemoryService {
    fn create_sender(
        &self,
        params: &StreamParams,
        events: EventSink,
    ) -> Result<Box<dyn SenderHandle>, TransportError> {
        params.validate()?;
        let connected = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let key = params.stream_key.clone();

        let flag = connected.clone();
        let cancel = closed.clone();
        self.spawn_connect(
            key.clone(),
            events,
            move || cancel.load(Ordering::Acquire),
            move |_| flag.store(true, Ordering::Release),
        )?;

        Ok(Box::new(MemorySender {
            hub: self.hub.clone(),
            key,
            connected,
            closed,
        }))
    }

    fn create_receiver(
        &self,
        params: &StreamParams,
        events: EventSink,
    ) -> Result<Box<dyn ReceiverHandle>, TransportError> {
        params.validate()?;
        let connected = Arc::new(AtomicBool::new(false));
        let inbox = Arc::new(Inbox::new(events.clone()));
        let key = params.stream_key.clone();

        let flag = connected.clone();
        let registered = inbox.clone();
        let cancel = inbox.clone();
        self.spawn_connect(
            key.clone(),
            events,
            move || cancel.is_closed(),
            move |channel| {
                channel.inboxes.push(registered);
                flag.store(true, Ordering::Release);
            },
        )?;

        Ok(Box::new(MemoryReceiver {
            hub: self.hub.clone(),
            key,
            inbox,
            connected,
        }))
    }
}

// ─── Handles ────────────────────────────────────────────────────────────────

struct MemorySender {
    hub: Arc<Hub>,
    key: String,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl SenderHandle for MemorySender {
    fn send(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        if data.is_empty() || data.len() > self.hub.config.max_packet_size {
            return Err(TransportError::InvalidArgs);
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::ServiceUnavailable);
        }

        let deadline = Instant::now() + timeout;
        let packet = Bytes::copy_from_slice(data);
        let capacity = self.hub.config.inbox_capacity;
        loop {
            {
                let mut state = self.hub.lock();
                if state.unavailable.contains(&self.key) {
                    return Err(TransportError::ServiceUnavailable);
                }
                let Some(channel) = state.channels.get_mut(&self.key) else {
                    return Err(TransportError::ServiceUnavailable);
                };
                channel.inboxes.retain(|i| !i.is_closed());
                if channel.inboxes.iter().all(|i| i.len() < capacity) {
                    for inbox in &channel.inboxes {
                        inbox.push(packet.clone());
                    }
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Again);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for MemorySender {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemoryReceiver {
    hub: Arc<Hub>,
    key: String,
    inbox: Arc<Inbox>,
    connected: Arc<AtomicBool>,
}

impl ReceiverHandle for MemoryReceiver {
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.connected.load(Ordering::Acquire) || self.hub.is_unavailable(&self.key) {
            return Err(TransportError::ServiceUnavailable);
        }

        let deadline = Instant::now() + timeout;
        let mut st = self.inbox.lock();
        loop {
            if let Some(front) = st.packets.front() {
                if front.len() > buf.len() {
                    return Err(TransportError::BufferNotEnough {
                        required: front.len(),
                    });
                }
                if let Some(packet) = st.packets.pop_front() {
                    buf[..packet.len()].copy_from_slice(&packet);
                    return Ok(packet.len());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Again);
            }
            st = self
                .inbox
                .readable
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn set_waker(&mut self, waker: Option<Waker>) {
        let mut st = self.inbox.lock();
        if let Some(w) = &waker {
            if !st.packets.is_empty() {
                w.wake();
            }
        }
        st.waker = waker;
    }
}

impl Drop for MemoryReceiver {
    fn drop(&mut self) {
        self.inbox.closed.store(true, Ordering::Release);
        self.inbox.lock().waker = None;
        self.inbox.readable.notify_all();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
