//! # mxs-transport
//!
//! Session layer for the multi-link streaming service: stream parameters,
//! the error taxonomy, asynchronous notifications, the [`Service`] seam to
//! the remote SDK, the [`Session`] state machine and the edge-triggered
//! [`Selector`] for servicing many receive sessions on one thread.
//!
//! [`MemoryService`] implements the service in-process and is what the
//! bridge's tests and demo run against.

pub mod error;
pub mod event;
pub mod params;
pub mod selector;
pub mod service;
pub mod session;

pub use error::{error_str, ErrorClass, TransportError, MAX_PACKET_SIZE};
pub use event::{ConnectFailure, LinkStats, SessionEvent};
pub use params::{LinkDeviceType, NetDevice, Role, StreamParams};
pub use selector::{Selectable, Selector};
pub use service::memory::{MemoryService, MemoryServiceConfig};
pub use service::{ReceiverHandle, SenderHandle, Service, Waker};
pub use session::{ConnectionState, Session, SessionId};
