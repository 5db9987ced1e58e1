//! # Receive Relay
//!
//! Hop between the receive worker (which owns the transport session) and
//! the demux worker (which reads a byte stream). Either an in-process
//! channel or a UDP loopback socket pair; the reader side is bound before
//! any worker starts so nothing sent early is lost.
//!
//! Closing the writer sends a one-byte sentinel so a reader blocked on the
//! socket wakes immediately instead of waiting out its read timeout.

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use bytes::{Buf, Bytes};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

/// Byte sent on close to unblock the reader.
pub const STOP_SENTINEL: u8 = 0;

const UDP_SCRATCH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Memory,
    /// Loopback UDP on `port` (`0` picks an ephemeral port).
    Udp { port: u16 },
}

/// Create a connected writer/reader pair. Reads block at most `read_timeout`
/// and then fail with `WouldBlock`/`TimedOut`.
pub fn open(mode: RelayMode, read_timeout: Duration) -> io::Result<(RelayWriter, RelayReader)> {
    match mode {
        RelayMode::Memory => {
            let (tx, rx) = unbounded();
            Ok((
                RelayWriter {
                    inner: WriterInner::Memory(tx),
                },
                RelayReader {
                    inner: ReaderInner::Memory(rx),
                    timeout: read_timeout,
                    pending: Bytes::new(),
                },
            ))
        }
        RelayMode::Udp { port } => {
            let reader = UdpSocket::bind((Ipv4Addr::LOCALHOST, port))?;
            reader.set_read_timeout(Some(read_timeout.max(Duration::from_millis(1))))?;
            let target = reader.local_addr()?;
            let writer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
            writer.connect(target)?;
            debug!(%target, "udp relay bound");
            Ok((
                RelayWriter {
                    inner: WriterInner::Udp(writer),
                },
                RelayReader {
                    inner: ReaderInner::Udp {
                        socket: reader,
                        scratch: vec![0u8; UDP_SCRATCH],
                    },
                    timeout: read_timeout,
                    pending: Bytes::new(),
                },
            ))
        }
    }
}

// ─── Writer ─────────────────────────────────────────────────────────────────

pub struct RelayWriter {
    inner: WriterInner,
}

enum WriterInner {
    Memory(Sender<Bytes>),
    Udp(UdpSocket),
}

impl RelayWriter {
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        match &self.inner {
            WriterInner::Memory(tx) => tx
                .send(Bytes::copy_from_slice(data))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "relay reader gone")),
            WriterInner::Udp(socket) => socket.send(data).map(|_| ()),
        }
    }

    /// Send the stop sentinel and release the writer.
    pub fn close(self) {
        if let Err(e) = self.send(&[STOP_SENTINEL]) {
            debug!(error = %e, "relay sentinel not delivered");
        }
    }
}

// ─── Reader ─────────────────────────────────────────────────────────────────

pub struct RelayReader {
    inner: ReaderInner,
    timeout: Duration,
    /// Remainder of the last datagram not yet handed out.
    pending: Bytes,
}

enum ReaderInner {
    Memory(Receiver<Bytes>),
    Udp { socket: UdpSocket, scratch: Vec<u8> },
}

impl RelayReader {
    /// Bound address in UDP mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            ReaderInner::Memory(_) => None,
            ReaderInner::Udp { socket, .. } => socket.local_addr().ok(),
        }
    }

    fn fill(&mut self) -> io::Result<bool> {
        match &mut self.inner {
            ReaderInner::Memory(rx) => match rx.recv_timeout(self.timeout) {
                Ok(data) => {
                    self.pending = data;
                    Ok(true)
                }
                Err(RecvTimeoutError::Timeout) => Err(io::ErrorKind::WouldBlock.into()),
                Err(RecvTimeoutError::Disconnected) => Ok(false),
            },
            ReaderInner::Udp { socket, scratch } => {
                let n = socket.recv(scratch)?;
                self.pending = Bytes::copy_from_slice(&scratch[..n]);
                Ok(true)
            }
        }
    }
}

impl Read for RelayReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            if !self.fill()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all_available(reader: &mut RelayReader) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    break
                }
                Err(e) => panic!("read failed: {}", e),
            }
        }
        out
    }

    #[test]
    fn memory_relay_preserves_bytes_across_small_reads() {
        let (writer, mut reader) = open(RelayMode::Memory, Duration::from_millis(20)).unwrap();
        writer.send(b"hello ").unwrap();
        writer.send(b"world").unwrap();
        assert_eq!(read_all_available(&mut reader), b"hello world");
    }

    #[test]
    fn memory_relay_times_out_with_would_block() {
        let (_writer, mut reader) = open(RelayMode::Memory, Duration::from_millis(10)).unwrap();
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn memory_relay_close_sends_sentinel_then_eof() {
        let (writer, mut reader) = open(RelayMode::Memory, Duration::from_millis(10)).unwrap();
        writer.close();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], STOP_SENTINEL);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn udp_relay_delivers_datagrams() {
        let (writer, mut reader) =
            open(RelayMode::Udp { port: 0 }, Duration::from_millis(200)).unwrap();
        assert!(reader.local_addr().is_some());
        writer.send(&[1, 2, 3, 4, 5, 6]).unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4, 5, 6]);

        writer.close();
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[STOP_SENTINEL]);
    }
}
