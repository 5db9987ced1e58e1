//! # Framed Container
//!
//! A minimal self-synchronising container for live transport. The byte
//! stream is a sequence of records:
//!
//! ```text
//!  ┌──────┬──────┬──────────┬──────────────┬───────────┬──────────────┐
//!  │ 'M' 'X'     │ kind u8  │ len u32 (BE) │ body[len] │ len u32 (BE) │
//!  └──────┴──────┴──────────┴──────────────┴───────────┴──────────────┘
//!  kind 'H'  stream table   version u8 · count u8 · count × stream entry
//!  kind 'U'  access unit    stream u8 · flags u8 · pts i64 · dts i64 · payload
//!  kind 'T'  trailer        (empty)
//! ```
//!
//! The stream table is repeated before every video keyframe and at least
//! every `header_interval` units, so a receiver joining mid-stream can
//! probe. Readers resynchronise on the record marker and silently skip
//! anything that does not parse as a record. The length is repeated after
//! the body; a record cut short by a lost packet fails that check and the
//! reader resumes scanning one byte past its marker, so the records that
//! follow are still found.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use super::{ContainerFormat, DemuxError, Demuxer, Muxer};
use crate::media::{CodecId, CodecParams, EncodedUnit, MediaKind, StreamDescriptor, TimeBase};
use crate::packetizer::ChunkWriter;
use crate::relay::RelayReader;

pub const MAGIC: [u8; 2] = *b"MX";
pub const KIND_HEADER: u8 = b'H';
pub const KIND_UNIT: u8 = b'U';
pub const KIND_TRAILER: u8 = b'T';

const RECORD_HEADER_LEN: usize = 7;
const RECORD_CHECK_LEN: usize = 4;
const MAX_RECORD_BODY: usize = 16 * 1024 * 1024;
const TABLE_VERSION: u8 = 1;
const STREAM_ENTRY_LEN: usize = 19;
const UNIT_PREFIX_LEN: usize = 18;
const FLAG_KEYFRAME: u8 = 0x01;
const READ_CHUNK: usize = 64 * 1024;

// ─── Encoding ───────────────────────────────────────────────────────────────

fn put_record(out: &mut BytesMut, kind: u8, body: &[u8]) {
    out.reserve(RECORD_HEADER_LEN + body.len() + RECORD_CHECK_LEN);
    out.put_slice(&MAGIC);
    out.put_u8(kind);
    out.put_u32(body.len() as u32);
    out.put_slice(body);
    out.put_u32(body.len() as u32);
}

fn encode_table(streams: &[StreamDescriptor]) -> Bytes {
    let mut body = BytesMut::with_capacity(2 + streams.len() * STREAM_ENTRY_LEN);
    body.put_u8(TABLE_VERSION);
    body.put_u8(streams.len() as u8);
    for s in streams {
        body.put_u8(s.index);
        body.put_u8(s.codec.to_byte());
        body.put_i32(s.time_base.num);
        body.put_i32(s.time_base.den);
        match s.params {
            CodecParams::Video { width, height } => {
                body.put_u8(b'V');
                body.put_u32(width);
                body.put_u32(height);
            }
            CodecParams::Audio {
                sample_rate,
                channels,
            } => {
                body.put_u8(b'A');
                body.put_u32(sample_rate);
                body.put_u32(channels as u32);
            }
        }
    }
    body.freeze()
}

fn decode_table(mut body: Bytes) -> Result<Vec<StreamDescriptor>, DemuxError> {
    if body.len() < 2 {
        return Err(DemuxError::Malformed("stream table too short".into()));
    }
    let version = body.get_u8();
    if version != TABLE_VERSION {
        return Err(DemuxError::Malformed(format!(
            "stream table version {}",
            version
        )));
    }
    let count = body.get_u8() as usize;
    if body.len() != count * STREAM_ENTRY_LEN {
        return Err(DemuxError::Malformed(format!(
            "stream table of {} entries has {} bytes",
            count,
            body.len()
        )));
    }
    let mut streams = Vec::with_capacity(count);
    for _ in 0..count {
        let index = body.get_u8();
        let codec_byte = body.get_u8();
        let time_base = TimeBase::new(body.get_i32(), body.get_i32());
        let tag = body.get_u8();
        let a = body.get_u32();
        let b = body.get_u32();
        let codec = CodecId::from_byte(codec_byte)
            .ok_or_else(|| DemuxError::Malformed(format!("unknown codec {}", codec_byte)))?;
        let params = match (tag, codec.kind()) {
            (b'V', MediaKind::Video) => CodecParams::Video {
                width: a,
                height: b,
            },
            (b'A', MediaKind::Audio) => CodecParams::Audio {
                sample_rate: a,
                channels: b.min(u8::MAX as u32) as u8,
            },
            _ => {
                return Err(DemuxError::Malformed(format!(
                    "stream {} params do not match codec",
                    index
                )))
            }
        };
        if !time_base.is_valid() {
            return Err(DemuxError::Malformed(format!(
                "stream {} has time base {}/{}",
                index, time_base.num, time_base.den
            )));
        }
        streams.push(StreamDescriptor {
            index,
            codec,
            time_base,
            params,
        });
    }
    Ok(streams)
}

fn decode_unit(mut body: Bytes) -> Result<EncodedUnit, DemuxError> {
    if body.len() < UNIT_PREFIX_LEN {
        return Err(DemuxError::Malformed(format!(
            "unit record of {} bytes",
            body.len()
        )));
    }
    let stream_index = body.get_u8();
    let flags = body.get_u8();
    let pts = body.get_i64();
    let dts = body.get_i64();
    Ok(EncodedUnit {
        stream_index,
        data: body,
        pts,
        dts,
        keyframe: flags & FLAG_KEYFRAME != 0,
    })
}

// ─── Muxer ──────────────────────────────────────────────────────────────────

pub struct FramedMuxer<W> {
    writer: W,
    streams: Vec<StreamDescriptor>,
    table: Bytes,
    header_interval: u32,
    /// Units written since the stream table was last emitted; `None` before the first.
    since_table: Option<u32>,
    scratch: BytesMut,
}

impl<W: Write> FramedMuxer<W> {
    pub fn new(
        writer: W,
        streams: Vec<StreamDescriptor>,
        header_interval: u32,
    ) -> io::Result<Self> {
        if streams.is_empty() || streams.len() > u8::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream count must be 1..=255",
            ));
        }
        for (i, s) in streams.iter().enumerate() {
            if streams[..i].iter().any(|o| o.index == s.index) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("duplicate stream index {}", s.index),
                ));
            }
        }
        let table = encode_table(&streams);
        Ok(Self {
            writer,
            streams,
            table,
            header_interval: header_interval.max(1),
            since_table: None,
            scratch: BytesMut::with_capacity(2048),
        })
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        self.scratch.clear();
        put_record(&mut self.scratch, KIND_HEADER, &self.table);
        self.since_table = Some(0);
        self.writer.write_all(&self.scratch)?;
        self.writer.flush()
    }

    /// Write one unit and flush, so its tail leaves immediately.
    pub fn write_unit(&mut self, unit: &EncodedUnit) -> io::Result<()> {
        let kind = self
            .streams
            .iter()
            .find(|s| s.index == unit.stream_index)
            .map(|s| s.kind())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown stream index {}", unit.stream_index),
                )
            })?;

        self.scratch.clear();
        let repeat = match self.since_table {
            None => true,
            Some(n) => {
                n > 0 && ((kind == MediaKind::Video && unit.keyframe) || n >= self.header_interval)
            }
        };
        if repeat {
            put_record(&mut self.scratch, KIND_HEADER, &self.table);
            self.since_table = Some(0);
        }

        let body_len = UNIT_PREFIX_LEN + unit.data.len();
        if body_len > MAX_RECORD_BODY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unit of {} bytes exceeds record limit", unit.data.len()),
            ));
        }
        self.scratch
            .reserve(RECORD_HEADER_LEN + body_len + RECORD_CHECK_LEN);
        self.scratch.put_slice(&MAGIC);
        self.scratch.put_u8(KIND_UNIT);
        self.scratch.put_u32(body_len as u32);
        self.scratch.put_u8(unit.stream_index);
        self.scratch
            .put_u8(if unit.keyframe { FLAG_KEYFRAME } else { 0 });
        self.scratch.put_i64(unit.pts);
        self.scratch.put_i64(unit.dts);
        self.scratch.put_slice(&unit.data);
        self.scratch.put_u32(body_len as u32);

        self.since_table = self.since_table.map(|n| n + 1);
        self.writer.write_all(&self.scratch)?;
        self.writer.flush()
    }

    pub fn write_trailer(&mut self) -> io::Result<()> {
        self.scratch.clear();
        put_record(&mut self.scratch, KIND_TRAILER, &[]);
        self.writer.write_all(&self.scratch)?;
        self.writer.flush()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl Muxer for FramedMuxer<ChunkWriter> {
    fn write_header(&mut self) -> io::Result<()> {
        FramedMuxer::write_header(self)
    }

    fn write_unit(&mut self, unit: &EncodedUnit) -> io::Result<()> {
        FramedMuxer::write_unit(self, unit)
    }

    fn write_trailer(&mut self) -> io::Result<()> {
        FramedMuxer::write_trailer(self)
    }

    fn writer_mut(&mut self) -> &mut ChunkWriter {
        self.get_mut()
    }

    fn into_writer(self: Box<Self>) -> ChunkWriter {
        self.into_inner()
    }
}

// ─── Demuxer ────────────────────────────────────────────────────────────────

pub struct FramedDemuxer<R> {
    input: R,
    buf: BytesMut,
    scratch: Vec<u8>,
    streams: Option<Vec<StreamDescriptor>>,
    eof: bool,
    skipped: u64,
}

impl<R: Read> FramedDemuxer<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            buf: BytesMut::with_capacity(READ_CHUNK),
            scratch: vec![0u8; READ_CHUNK],
            streams: None,
            eof: false,
            skipped: 0,
        }
    }

    /// Bytes discarded while resynchronising.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    pub fn streams(&self) -> Option<&[StreamDescriptor]> {
        self.streams.as_deref()
    }

    pub fn probe_streams(&mut self) -> Result<Vec<StreamDescriptor>, DemuxError> {
        if let Some(streams) = &self.streams {
            return Ok(streams.clone());
        }
        loop {
            let (kind, body) = self.next_record()?;
            if kind != KIND_HEADER {
                trace!(kind = %(kind as char), "skipping record before stream table");
                continue;
            }
            match decode_table(body) {
                Ok(streams) => {
                    info!(streams = streams.len(), "stream table found");
                    self.streams = Some(streams.clone());
                    return Ok(streams);
                }
                Err(e) => warn!(error = %e, "ignoring bad stream table"),
            }
        }
    }

    pub fn read_next_unit(&mut self) -> Result<EncodedUnit, DemuxError> {
        loop {
            let (kind, body) = self.next_record()?;
            match kind {
                KIND_UNIT => return decode_unit(body),
                KIND_HEADER => match decode_table(body) {
                    Ok(streams) => {
                        if self.streams.as_ref() != Some(&streams) {
                            info!(streams = streams.len(), "stream table changed");
                            self.streams = Some(streams);
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring bad stream table"),
                },
                _ => debug!("trailer record"),
            }
        }
    }

    fn next_record(&mut self) -> Result<(u8, Bytes), DemuxError> {
        loop {
            if let Some(record) = self.parse_record() {
                return Ok(record);
            }
            match self.fill() {
                // A partial record can no longer complete; look past its marker.
                Err(DemuxError::Eof) if !self.buf.is_empty() => self.discard(1),
                other => other?,
            }
        }
    }

    fn fill(&mut self) -> Result<(), DemuxError> {
        if self.eof {
            return Err(DemuxError::Eof);
        }
        match self.input.read(&mut self.scratch) {
            Ok(0) => {
                self.eof = true;
                Err(DemuxError::Eof)
            }
            Ok(n) => {
                self.buf.extend_from_slice(&self.scratch[..n]);
                Ok(())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Err(DemuxError::Again)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(DemuxError::Io(e)),
        }
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            self.buf.advance(n);
            self.skipped += n as u64;
            trace!(bytes = n, "resync skipped bytes");
        }
    }

    fn parse_record(&mut self) -> Option<(u8, Bytes)> {
        loop {
            let found = self.buf.windows(2).position(|w| w == MAGIC.as_slice());
            match found {
                Some(p) => self.discard(p),
                None => {
                    // Keep a trailing first magic byte; the second may follow.
                    let keep = usize::from(self.buf.last() == Some(&MAGIC[0]));
                    let n = self.buf.len() - keep;
                    self.discard(n);
                    return None;
                }
            }
            if self.buf.len() < RECORD_HEADER_LEN {
                return None;
            }
            let kind = self.buf[2];
            let len = u32::from_be_bytes([self.buf[3], self.buf[4], self.buf[5], self.buf[6]])
                as usize;
            if !matches!(kind, KIND_HEADER | KIND_UNIT | KIND_TRAILER) || len > MAX_RECORD_BODY {
                self.discard(1);
                continue;
            }
            let end = RECORD_HEADER_LEN + len;
            if self.buf.len() < end + RECORD_CHECK_LEN {
                return None;
            }
            let check = u32::from_be_bytes([
                self.buf[end],
                self.buf[end + 1],
                self.buf[end + 2],
                self.buf[end + 3],
            ]) as usize;
            if check != len {
                debug!(kind = %(kind as char), len, "truncated record, resyncing");
                self.discard(1);
                continue;
            }
            self.buf.advance(RECORD_HEADER_LEN);
            let body = self.buf.split_to(len).freeze();
            self.buf.advance(RECORD_CHECK_LEN);
            return Some((kind, body));
        }
    }
}

impl<R: Read + Send> Demuxer for FramedDemuxer<R> {
    fn probe_streams(&mut self) -> Result<Vec<StreamDescriptor>, DemuxError> {
        FramedDemuxer::probe_streams(self)
    }

    fn read_next_unit(&mut self) -> Result<EncodedUnit, DemuxError> {
        FramedDemuxer::read_next_unit(self)
    }
}

// ─── Format ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FramedFormat {
    pub header_interval: u32,
}

impl Default for FramedFormat {
    fn default() -> Self {
        Self { header_interval: 50 }
    }
}

impl ContainerFormat for FramedFormat {
    fn name(&self) -> &'static str {
        "mxs-framed"
    }

    fn open_muxer(
        &self,
        writer: ChunkWriter,
        streams: Vec<StreamDescriptor>,
    ) -> io::Result<Box<dyn Muxer>> {
        Ok(Box::new(FramedMuxer::new(
            writer,
            streams,
            self.header_interval,
        )?))
    }

    fn open_demuxer(&self, input: RelayReader) -> Box<dyn Demuxer> {
        Box::new(FramedDemuxer::new(input))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
