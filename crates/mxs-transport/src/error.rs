//! # Transport Error Taxonomy
//!
//! Every fallible transport operation returns a [`TransportError`]. The
//! numeric codes are stable and mirror the remote service's wire codes, so
//! a failure reported asynchronously (inside a notification) and one
//! returned synchronously compare equal.

use thiserror::Error;

/// Largest payload a single send/receive call may carry.
pub const MAX_PACKET_SIZE: usize = 1316;

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Session not connected yet, or the service is temporarily unreachable.
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("out of memory")]
    NoMem,
    /// Operation would block; retry later.
    #[error("resource temporarily unavailable, try again")]
    Again,
    #[error("invalid arguments")]
    InvalidArgs,
    /// Handle has been closed or never existed.
    #[error("session not found")]
    NotFound,
    /// The next packet does not fit the supplied buffer. The packet is not
    /// consumed; retry with a buffer of at least `required` bytes.
    #[error("buffer too small, {required} bytes required")]
    BufferNotEnough { required: usize },
    #[error("socket I/O error")]
    SockIo,
    #[error("data server lost")]
    DataServerLost,
    #[error("data port detection failed")]
    DataPortDetectFailed,
    #[error("socket readable but empty")]
    SockCannotReadEmpty,
    #[error("network congestion")]
    Congestion,
    #[error("data not received in time")]
    NotReceiveDataInTime,
}

/// Coarse handling class of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same call (possibly after a short sleep or resize).
    Transient,
    /// Caller bug: bad arguments or a dead handle. Never retried.
    CodeDefect,
    /// Allocation failure.
    ResourceExhausted,
    /// Link-level condition reported by the service; informational.
    Network,
}

impl TransportError {
    /// Stable numeric code. `0` is reserved for success.
    pub fn code(&self) -> u32 {
        match self {
            TransportError::ServiceUnavailable => 1,
            TransportError::NoMem => 2,
            TransportError::Again => 3,
            TransportError::InvalidArgs => 4,
            TransportError::NotFound => 5,
            TransportError::BufferNotEnough { .. } => 6,
            TransportError::SockIo => 7,
            TransportError::DataServerLost => 8,
            TransportError::DataPortDetectFailed => 9,
            TransportError::SockCannotReadEmpty => 10,
            TransportError::Congestion => 11,
            TransportError::NotReceiveDataInTime => 12,
        }
    }

    /// Inverse of [`code`](Self::code). `required` is only used for
    /// `BufferNotEnough`. Returns `None` for `0` and unknown codes.
    pub fn from_code(code: u32, required: usize) -> Option<Self> {
        Some(match code {
            1 => TransportError::ServiceUnavailable,
            2 => TransportError::NoMem,
            3 => TransportError::Again,
            4 => TransportError::InvalidArgs,
            5 => TransportError::NotFound,
            6 => TransportError::BufferNotEnough { required },
            7 => TransportError::SockIo,
            8 => TransportError::DataServerLost,
            9 => TransportError::DataPortDetectFailed,
            10 => TransportError::SockCannotReadEmpty,
            11 => TransportError::Congestion,
            12 => TransportError::NotReceiveDataInTime,
            _ => return None,
        })
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::ServiceUnavailable
            | TransportError::Again
            | TransportError::BufferNotEnough { .. } => ErrorClass::Transient,
            TransportError::InvalidArgs | TransportError::NotFound => ErrorClass::CodeDefect,
            TransportError::NoMem => ErrorClass::ResourceExhausted,
            TransportError::SockIo
            | TransportError::DataServerLost
            | TransportError::DataPortDetectFailed
            | TransportError::SockCannotReadEmpty
            | TransportError::Congestion
            | TransportError::NotReceiveDataInTime => ErrorClass::Network,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Human-readable text for a raw numeric code, `"ok"` for `0`.
pub fn error_str(code: u32) -> String {
    match code {
        0 => "ok".to_string(),
        _ => match TransportError::from_code(code, 0) {
            Some(TransportError::BufferNotEnough { .. }) => "buffer too small".to_string(),
            Some(e) => e.to_string(),
            None => format!("unknown error code {}", code),
        },
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique_and_invertible() {
        let mut seen = std::collections::HashSet::new();
        for code in 1..=12 {
            let err = TransportError::from_code(code, 42).unwrap();
            assert_eq!(err.code(), code);
            assert!(seen.insert(err.code()));
        }
        assert!(TransportError::from_code(0, 0).is_none());
        assert!(TransportError::from_code(99, 0).is_none());
    }

    #[test]
    fn buffer_not_enough_carries_required_length() {
        let err = TransportError::from_code(6, 4096).unwrap();
        assert_eq!(err, TransportError::BufferNotEnough { required: 4096 });
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn classification() {
        assert_eq!(TransportError::Again.class(), ErrorClass::Transient);
        assert_eq!(TransportError::ServiceUnavailable.class(), ErrorClass::Transient);
        assert_eq!(TransportError::InvalidArgs.class(), ErrorClass::CodeDefect);
        assert_eq!(TransportError::NotFound.class(), ErrorClass::CodeDefect);
        assert_eq!(TransportError::NoMem.class(), ErrorClass::ResourceExhausted);
        assert_eq!(TransportError::Congestion.class(), ErrorClass::Network);
        assert!(!TransportError::DataServerLost.is_transient());
    }

    #[test]
    fn error_str_covers_ok_and_unknown() {
        assert_eq!(error_str(0), "ok");
        assert_eq!(error_str(3), "resource temporarily unavailable, try again");
        assert_eq!(error_str(6), "buffer too small");
        assert!(error_str(1000).contains("1000"));
    }
}
