//! # Playback Sink
//!
//! The host's playback side. Decode workers hand every converted frame to a
//! [`PlaybackSink`]; video and audio arrive from different threads, so
//! implementations must be `Sync`.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};

// ─── Formats ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    None,
    I420,
    Nv12,
    Yvyu,
    Yuy2,
    Uyvy,
    Rgba,
    Bgra,
    Bgrx,
    Y800,
    I444,
    I422,
    I40a,
    I42a,
    Yuva,
    I010,
    P010,
    I210,
    I412,
    Ya2l,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Unknown,
    U8,
    S16,
    S32,
    Float,
    U8Planar,
    S16Planar,
    S32Planar,
    FloatPlanar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkColorSpace {
    Default,
    Cs601,
    Cs709,
    Srgb,
    Cs2100Pq,
    Cs2100Hlg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeType {
    Default,
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerLayout {
    Unknown,
    Mono,
    Stereo,
    TwoPointOne,
    FourPointZero,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
}

// ─── Frames ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub planes: Vec<Bytes>,
    pub linesizes: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    pub color_space: SinkColorSpace,
    pub range: RangeType,
    /// Presentation time in nanoseconds.
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub planes: Vec<Bytes>,
    pub sample_rate: u32,
    pub layout: SpeakerLayout,
    pub format: AudioFormat,
    /// Samples per channel.
    pub frames: u32,
    pub timestamp_ns: i64,
}

pub trait PlaybackSink: Send + Sync {
    fn deliver_video(&self, frame: VideoFrame);
    fn deliver_audio(&self, frame: AudioFrame);
}

// ─── Channel Sink ───────────────────────────────────────────────────────────

/// Either kind of frame, as forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// Forwards frames to a channel, for hosts that consume on their own thread.
pub struct ChannelSink {
    tx: Sender<SinkFrame>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<SinkFrame>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl PlaybackSink for ChannelSink {
    fn deliver_video(&self, frame: VideoFrame) {
        let _ = self.tx.send(SinkFrame::Video(frame));
    }

    fn deliver_audio(&self, frame: AudioFrame) {
        let _ = self.tx.send(SinkFrame::Audio(frame));
    }
}
