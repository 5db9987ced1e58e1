//! # Service Seam
//!
//! The remote streaming service is reached through the [`Service`] trait.
//! A service hands out one raw handle per session; the [`Session`] wrapper
//! in this crate owns that handle and enforces the state machine on top of
//! it. Dropping a handle destroys it on the service side.
//!
//! [`Session`]: crate::session::Session

use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::TransportError;
use crate::event::EventSink;
use crate::params::StreamParams;
use crate::session::SessionId;

pub mod memory;

pub trait Service: Send + Sync {
    /// Start connecting a sender. The outcome arrives later on `events` as
    /// `ServerConnected` or `ServerConnectFailed`.
    fn create_sender(
        &self,
        params: &StreamParams,
        events: EventSink,
    ) -> Result<Box<dyn SenderHandle>, TransportError>;

    /// Start connecting a receiver. Same contract as [`create_sender`](Self::create_sender).
    fn create_receiver(
        &self,
        params: &StreamParams,
        events: EventSink,
    ) -> Result<Box<dyn ReceiverHandle>, TransportError>;
}

pub trait SenderHandle: Send {
    /// Send one packet of at most [`MAX_PACKET_SIZE`](crate::MAX_PACKET_SIZE)
    /// bytes. A zero `timeout` never blocks.
    fn send(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;
}

pub trait ReceiverHandle: Send {
    /// Copy the next packet into `buf` and return its length.
    ///
    /// When the packet is larger than `buf`, fails with
    /// `BufferNotEnough { required }` and leaves the packet queued.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Install (or clear) the readiness waker. The service fires it when
    /// data becomes available after the handle had none, and immediately on
    /// install if data is already pending.
    fn set_waker(&mut self, waker: Option<Waker>);
}

// ─── Readiness ──────────────────────────────────────────────────────────────

/// Posts a session id to a selector's ready queue.
#[derive(Debug, Clone)]
pub struct Waker {
    id: SessionId,
    tx: Sender<SessionId>,
}

impl Waker {
    pub fn new(id: SessionId, tx: Sender<SessionId>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn wake(&self) {
        // Selector gone: nothing left to notify.
        let _ = self.tx.send(self.id);
    }
}
