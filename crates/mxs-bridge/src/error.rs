use std::io;
use std::time::Duration;

use mxs_transport::{ConnectFailure, ErrorClass, TransportError};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("session open failed: {0}")]
    Open(#[from] TransportError),
    #[error("server connect failed: {code} ({detail}), {failed_devices} device(s) failed")]
    ConnectFailed {
        code: TransportError,
        detail: String,
        failed_devices: u32,
    },
    #[error("no playable streams found")]
    NoStreams,
    #[error("streams not ready within {0:?}")]
    NotReady(Duration),
    #[error("pipeline failed: {0}")]
    Pipeline(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<ConnectFailure> for BridgeError {
    fn from(f: ConnectFailure) -> Self {
        BridgeError::ConnectFailed {
            code: f.code,
            detail: f.detail,
            failed_devices: f.failed_devices,
        }
    }
}

// ── Retry policy ────────────────────────────────────────────────────

/// What a worker does after a transport call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Sleep the configured backoff, then repeat the call.
    Backoff,
    /// Grow the receive buffer to this many bytes and repeat immediately.
    Resize(usize),
    /// Log and keep going; the condition is informational.
    Continue,
    /// Stop the operation; retrying cannot help.
    Abort,
}

pub fn disposition(err: &TransportError) -> Disposition {
    match err {
        TransportError::BufferNotEnough { required } => Disposition::Resize(*required),
        e => match e.class() {
            ErrorClass::Transient => Disposition::Backoff,
            ErrorClass::Network => Disposition::Continue,
            ErrorClass::CodeDefect | ErrorClass::ResourceExhausted => Disposition::Abort,
        },
    }
}
