//! # Chunked Packetizer
//!
//! Send side of the bridge. Encoded access units are framed (ADTS for raw
//! AAC), rescaled into the container time base and muxed; the muxer writes
//! through a [`ChunkWriter`], which cuts the byte stream into chunks of at
//! most `max_packet_size` bytes and hands each chunk to the transport
//! session. The muxer flushes after every unit, so a unit's tail is sent
//! as a short chunk rather than waiting for the next unit.
//!
//! A chunk the session refuses is logged and counted; the rest of the unit
//! it belonged to is withheld, the unit is reported as dropped and the
//! stream continues with the next unit.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use mxs_transport::{Session, TransportError};
use tracing::{debug, warn};

use crate::config::SendConfig;
use crate::container::Muxer;
use crate::error::{disposition, Disposition};
use crate::media::adts::{self, AdtsConfig, AdtsError};
use crate::media::{
    rescale, AccessUnit, CodecId, CodecParams, EncodedUnit, MediaKind, StreamDescriptor,
    TimeBase, Track,
};
use crate::stats::SendStats;

// ─── Chunk Writer ───────────────────────────────────────────────────────────

/// `io::Write` adapter that forwards bounded chunks to a send session.
pub struct ChunkWriter {
    session: Session,
    max_packet_size: usize,
    send_timeout: Duration,
    again_retries: u32,
    again_backoff: Duration,
    pending: BytesMut,
    stats: Arc<SendStats>,
    /// First send error since the last [`take_failure`](Self::take_failure).
    /// While set, further chunks are discarded instead of sent.
    failure: Option<TransportError>,
}

impl ChunkWriter {
    pub fn new(session: Session, cfg: &SendConfig, stats: Arc<SendStats>) -> Self {
        let max_packet_size = cfg.max_packet_size.max(1);
        Self {
            session,
            max_packet_size,
            send_timeout: cfg.send_timeout,
            again_retries: cfg.again_retries,
            again_backoff: cfg.again_backoff,
            pending: BytesMut::with_capacity(max_packet_size),
            stats,
            failure: None,
        }
    }

    /// Clear the failure and resume sending. Call at unit boundaries.
    pub fn take_failure(&mut self) -> Option<TransportError> {
        self.failure.take()
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    fn send_chunk(&mut self, chunk: &[u8]) {
        if self.failure.is_some() {
            self.stats.chunks_discarded.inc();
            return;
        }
        let mut attempts = 0u32;
        loop {
            let err = match self.session.send(chunk, self.send_timeout) {
                Ok(()) => {
                    self.stats.packets_sent.inc();
                    self.stats.bytes_sent.add(chunk.len() as u64);
                    return;
                }
                Err(e) => e,
            };
            if disposition(&err) == Disposition::Backoff && attempts < self.again_retries {
                attempts += 1;
                self.stats.again_retries.inc();
                thread::sleep(self.again_backoff);
                continue;
            }

            self.stats.send_failures.inc();
            warn!(
                session = %self.session.id(),
                code = %err,
                bytes = chunk.len(),
                attempts = attempts + 1,
                "chunk send failed, withholding rest of unit"
            );
            self.failure = Some(err);
            return;
        }
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let max = self.max_packet_size;
        let mut rest = data;
        while !rest.is_empty() {
            if self.pending.is_empty() && rest.len() >= max {
                let (chunk, tail) = rest.split_at(max);
                self.send_chunk(chunk);
                rest = tail;
                continue;
            }
            let take = (max - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == max {
                let chunk = self.pending.split().freeze();
                self.send_chunk(&chunk);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let chunk = self.pending.split().freeze();
            self.send_chunk(&chunk);
        }
        Ok(())
    }
}

// ─── Tracks ─────────────────────────────────────────────────────────────────

/// An encoder output that becomes one container stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSpec {
    pub track: Track,
    pub codec: CodecId,
    pub params: CodecParams,
}

impl TrackSpec {
    pub fn video(codec: CodecId, width: u32, height: u32) -> Self {
        Self {
            track: Track::Video,
            codec,
            params: CodecParams::Video { width, height },
        }
    }

    pub fn audio(track: u8, codec: CodecId, sample_rate: u32, channels: u8) -> Self {
        Self {
            track: Track::Audio(track),
            codec,
            params: CodecParams::Audio {
                sample_rate,
                channels,
            },
        }
    }

    /// AAC track using the configured ADTS sample rate and channel count.
    pub fn aac(track: u8, adts: &AdtsConfig) -> Self {
        Self::audio(track, CodecId::Aac, adts.sample_rate, adts.channels)
    }
}

/// Assign container stream indices: video first, then audio in the given order.
pub fn stream_layout(tracks: &[TrackSpec], time_base: TimeBase) -> Vec<StreamDescriptor> {
    let video = tracks.iter().filter(|t| t.codec.kind() == MediaKind::Video);
    let audio = tracks.iter().filter(|t| t.codec.kind() == MediaKind::Audio);
    video
        .chain(audio)
        .enumerate()
        .map(|(i, t)| StreamDescriptor {
            index: i as u8,
            codec: t.codec,
            time_base,
            params: t.params,
        })
        .collect()
}

// ─── Packetizer ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    UnknownTrack,
    Framing(AdtsError),
    Mux(String),
    Send(TransportError),
    Stopping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedUnit {
    pub track: Track,
    pub pts: i64,
    pub reason: DropReason,
}

pub type DropObserver = Box<dyn FnMut(&DroppedUnit) + Send>;

struct Route {
    track: Track,
    stream_index: u8,
    /// Present for AAC streams.
    adts: Option<AdtsConfig>,
}

pub struct Packetizer {
    muxer: Box<dyn Muxer>,
    routes: Vec<Route>,
    time_base: TimeBase,
    stats: Arc<SendStats>,
    observer: Option<DropObserver>,
}

impl Packetizer {
    /// `streams` must come from [`stream_layout`] over the same `tracks`.
    pub fn new(
        muxer: Box<dyn Muxer>,
        tracks: &[TrackSpec],
        streams: &[StreamDescriptor],
        cfg: &SendConfig,
        stats: Arc<SendStats>,
    ) -> Self {
        let video = tracks.iter().filter(|t| t.codec.kind() == MediaKind::Video);
        let audio = tracks.iter().filter(|t| t.codec.kind() == MediaKind::Audio);
        let routes = video
            .chain(audio)
            .zip(streams)
            .map(|(t, s)| Route {
                track: t.track,
                stream_index: s.index,
                adts: match (t.codec, t.params) {
                    (
                        CodecId::Aac,
                        CodecParams::Audio {
                            sample_rate,
                            channels,
                        },
                    ) => Some(AdtsConfig {
                        profile: cfg.adts.profile,
                        sample_rate,
                        channels,
                    }),
                    _ => None,
                },
            })
            .collect();
        Self {
            muxer,
            routes,
            time_base: cfg.time_base,
            stats,
            observer: None,
        }
    }

    pub fn set_drop_observer(&mut self, observer: DropObserver) {
        self.observer = Some(observer);
    }

    /// Emit the stream table.
    pub fn start(&mut self) -> io::Result<()> {
        self.muxer.write_header()?;
        if let Some(err) = self.muxer.writer_mut().take_failure() {
            warn!(code = %err, "stream table not delivered, will repeat with next keyframe");
        }
        Ok(())
    }

    /// Frame, rescale and mux one access unit.
    pub fn write_access_unit(&mut self, au: AccessUnit) -> Result<(), DroppedUnit> {
        let route = self
            .routes
            .iter()
            .find(|r| r.track == au.track)
            .map(|r| (r.stream_index, r.adts));
        let Some((stream_index, adts_cfg)) = route else {
            return Err(self.dropped(&au, DropReason::UnknownTrack));
        };

        let data = match &adts_cfg {
            Some(cfg) => match adts::ensure_framed(cfg, &au.data) {
                Ok(framed) => {
                    if framed.len() != au.data.len() {
                        self.stats.adts_wrapped.inc();
                    }
                    framed
                }
                Err(e) => return Err(self.dropped(&au, DropReason::Framing(e))),
            },
            None => au.data.clone(),
        };

        let unit = EncodedUnit {
            stream_index,
            data,
            pts: rescale(au.pts, au.time_base, self.time_base),
            dts: rescale(au.dts, au.time_base, self.time_base),
            keyframe: au.keyframe,
        };

        self.muxer.writer_mut().take_failure();
        if let Err(e) = self.muxer.write_unit(&unit) {
            return Err(self.dropped(&au, DropReason::Mux(e.to_string())));
        }
        if let Some(err) = self.muxer.writer_mut().take_failure() {
            return Err(self.dropped(&au, DropReason::Send(err)));
        }
        self.stats.units_written.inc();
        Ok(())
    }

    /// Write the trailer and return the session.
    pub fn finish(mut self) -> Session {
        if let Err(e) = self.muxer.write_trailer() {
            warn!(error = %e, "trailer write failed");
        }
        let mut writer = self.muxer.into_writer();
        if writer.take_failure().is_some() {
            debug!("trailer not delivered");
        }
        writer.into_session()
    }

    fn dropped(&mut self, au: &AccessUnit, reason: DropReason) -> DroppedUnit {
        self.stats.units_dropped.inc();
        let dropped = DroppedUnit {
            track: au.track,
            pts: au.pts,
            reason,
        };
        debug!(track = ?dropped.track, pts = dropped.pts, reason = ?dropped.reason, "unit dropped");
        if let Some(observer) = self.observer.as_mut() {
            observer(&dropped);
        }
        dropped
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
