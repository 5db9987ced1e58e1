//! # Readiness Selector
//!
//! Lets one thread service many receive sessions. Each registered session
//! gets a [`Waker`] that posts its id to the selector's ready queue when the
//! session's inbox goes from empty to non-empty. Readiness is therefore
//! edge-triggered: a callback must drain its session until `Again`, or no
//! further notification arrives for data that is already queued.
//!
//! The selector owns the registered contexts. A context closed from inside
//! its callback is dropped on the next poll.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::params::Role;
use crate::service::Waker;
use crate::session::{ConnectionState, Session, SessionId};

/// A value the selector can register: anything that owns a receive session.
pub trait Selectable {
    fn session(&mut self) -> &mut Session;
}

impl Selectable for Session {
    fn session(&mut self) -> &mut Session {
        self
    }
}

pub struct Selector<T: Selectable> {
    ready_tx: Sender<SessionId>,
    ready_rx: Receiver<SessionId>,
    entries: HashMap<SessionId, T>,
}

impl<T: Selectable> Default for Selector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Selectable> Selector<T> {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = unbounded();
        Self {
            ready_tx,
            ready_rx,
            entries: HashMap::new(),
        }
    }

    /// Register `ctx`. Its session must be an open receiver. If the session
    /// already has data queued it is reported ready on the next poll.
    pub fn add_session(&mut self, mut ctx: T) -> Result<SessionId, TransportError> {
        let session = ctx.session();
        if session.role() != Role::Receiver {
            return Err(TransportError::InvalidArgs);
        }
        let id = session.id();
        if self.entries.contains_key(&id) {
            return Err(TransportError::InvalidArgs);
        }
        session.attach_waker(Waker::new(id, self.ready_tx.clone()))?;
        self.entries.insert(id, ctx);
        debug!(session = %id, registered = self.entries.len(), "session added to selector");
        Ok(id)
    }

    /// Unregister and hand back the context. Pending readiness for it is discarded.
    pub fn remove_session(&mut self, id: SessionId) -> Option<T> {
        let mut ctx = self.entries.remove(&id)?;
        ctx.session().detach_waker();
        debug!(session = %id, registered = self.entries.len(), "session removed from selector");
        Some(ctx)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait up to `timeout` for readiness, then invoke `on_ready` once per
    /// ready session. Returns how many callbacks ran (`0` on timeout).
    ///
    /// Fails with `InvalidArgs` when nothing is registered.
    pub fn poll<F>(&mut self, timeout: Duration, mut on_ready: F) -> Result<usize, TransportError>
    where
        F: FnMut(SessionId, &mut T),
    {
        self.prune_closed();
        if self.entries.is_empty() {
            return Err(TransportError::InvalidArgs);
        }

        let deadline = Instant::now() + timeout;
        let mut ready: Vec<SessionId> = Vec::new();
        loop {
            let now = Instant::now();
            let wait = deadline.saturating_duration_since(now);
            match self.ready_rx.recv_timeout(wait) {
                Ok(id) => {
                    ready.push(id);
                    ready.extend(self.ready_rx.try_iter());
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Unreachable while `ready_tx` is held; surfaces as a socket-level failure.
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::SockIo),
            }
            ready.retain(|id| self.entries.contains_key(id));
            if !ready.is_empty() || Instant::now() >= deadline {
                break;
            }
        }

        ready.sort_unstable();
        ready.dedup();
        let mut dispatched = 0;
        for id in ready {
            if let Some(ctx) = self.entries.get_mut(&id) {
                trace!(session = %id, "session ready");
                on_ready(id, ctx);
                dispatched += 1;
            }
        }
        self.prune_closed();
        Ok(dispatched)
    }

    /// Unregister everything and return the contexts.
    pub fn destroy(mut self) -> Vec<T> {
        let ids: Vec<SessionId> = self.entries.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.remove_session(id))
            .collect()
    }

    fn prune_closed(&mut self) {
        self.entries.retain(|id, ctx| {
            let open = ctx.session().state() != ConnectionState::Closed;
            if !open {
                debug!(session = %id, "dropping closed session from selector");
            }
            open
        });
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StreamParams;
    use crate::service::memory::MemoryService;

    fn receiver(svc: &MemoryService, key: &str) -> Session {
        let mut s = Session::open(svc, StreamParams::new("https://h", "d1", key), Role::Receiver)
            .unwrap();
        s.wait_connected().unwrap();
        s
    }

    fn sender(svc: &MemoryService, key: &str) -> Session {
        let mut s =
            Session::open(svc, StreamParams::new("https://h", "d1", key), Role::Sender).unwrap();
        s.wait_connected().unwrap();
        s
    }

    fn drain(session: &mut Session) -> usize {
        let mut buf = [0u8; 64];
        let mut n = 0;
        while session.receive(&mut buf, Duration::ZERO).is_ok() {
            n += 1;
        }
        n
    }

    #[test]
    fn poll_without_sessions_is_invalid() {
        let mut sel: Selector<Session> = Selector::new();
        let res = sel.poll(Duration::from_millis(10), |_, _| {});
        assert_eq!(res, Err(TransportError::InvalidArgs));
    }

    #[test]
    fn sender_cannot_be_registered() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        assert_eq!(
            sel.add_session(sender(&svc, "k")),
            Err(TransportError::InvalidArgs)
        );
    }

    #[test]
    fn ready_session_dispatched_once() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        let id = sel.add_session(receiver(&svc, "k")).unwrap();
        let mut tx = sender(&svc, "k");
        tx.send(b"one", Duration::ZERO).unwrap();
        tx.send(b"two", Duration::ZERO).unwrap();

        let mut seen = Vec::new();
        let n = sel
            .poll(Duration::from_millis(500), |sid, s| {
                seen.push((sid, drain(s)));
            })
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen, vec![(id, 2)]);
    }

    #[test]
    fn no_new_data_no_dispatch() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        sel.add_session(receiver(&svc, "k")).unwrap();
        let mut tx = sender(&svc, "k");
        tx.send(b"x", Duration::ZERO).unwrap();
        sel.poll(Duration::from_millis(200), |_, s| {
            drain(s);
        })
        .unwrap();

        let n = sel
            .poll(Duration::from_millis(50), |_, _| panic!("spurious readiness"))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn undrained_session_stalls() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        sel.add_session(receiver(&svc, "k")).unwrap();
        let mut tx = sender(&svc, "k");
        tx.send(b"a", Duration::ZERO).unwrap();
        tx.send(b"b", Duration::ZERO).unwrap();

        // Read one packet only; the second stays queued without a new edge.
        sel.poll(Duration::from_millis(200), |_, s| {
            let mut buf = [0u8; 8];
            s.receive(&mut buf, Duration::ZERO).unwrap();
        })
        .unwrap();
        let n = sel.poll(Duration::from_millis(50), |_, _| {}).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn several_sessions_ready_together() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        let a = sel.add_session(receiver(&svc, "ka")).unwrap();
        let b = sel.add_session(receiver(&svc, "kb")).unwrap();
        sender(&svc, "ka").send(b"1", Duration::ZERO).unwrap();
        sender(&svc, "kb").send(b"2", Duration::ZERO).unwrap();

        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        while seen.len() < 2 && Instant::now() < deadline {
            sel.poll(Duration::from_millis(100), |id, s| {
                drain(s);
                seen.push(id);
            })
            .unwrap();
        }
        seen.sort();
        let mut want = vec![a, b];
        want.sort();
        assert_eq!(seen, want);
    }

    #[test]
    fn remove_returns_context_and_stops_dispatch() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        let id = sel.add_session(receiver(&svc, "k")).unwrap();
        let removed = sel.remove_session(id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(sel.remove_session(id).is_none());
        assert!(sel.is_empty());
    }

    #[test]
    fn closed_session_pruned_after_callback() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        sel.add_session(receiver(&svc, "k")).unwrap();
        sender(&svc, "k").send(b"x", Duration::ZERO).unwrap();
        sel.poll(Duration::from_millis(200), |_, s| s.close()).unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn destroy_hands_back_everything() {
        let svc = MemoryService::new();
        let mut sel = Selector::new();
        sel.add_session(receiver(&svc, "a")).unwrap();
        sel.add_session(receiver(&svc, "b")).unwrap();
        let back = sel.destroy();
        assert_eq!(back.len(), 2);
    }
}
