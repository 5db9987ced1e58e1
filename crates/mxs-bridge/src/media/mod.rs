//! # Media Types
//!
//! Access units, stream descriptors and time bases shared by the send and
//! receive paths.

use bytes::Bytes;

pub mod adts;
pub mod frame;

// ─── Time Base ──────────────────────────────────────────────────────────────

/// Rational time base: one tick is `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    /// 90 kHz, the container clock.
    pub const MPEG: TimeBase = TimeBase::new(1, 90_000);
    pub const MILLIS: TimeBase = TimeBase::new(1, 1_000);
    pub const NANOS: TimeBase = TimeBase::new(1, 1_000_000_000);

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

/// Convert `ts` from `from` ticks to `to` ticks, rounding half away from zero.
///
/// Invalid time bases leave the value unchanged.
pub fn rescale(ts: i64, from: TimeBase, to: TimeBase) -> i64 {
    if !from.is_valid() || !to.is_valid() || from == to {
        return ts;
    }
    let num = ts as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    let half = den / 2;
    let q = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

// ─── Streams ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    H264,
    Hevc,
    Aac,
    /// Uncompressed planar 4:2:0 video.
    RawVideo,
    /// Uncompressed interleaved signed 16-bit audio.
    PcmS16,
}

impl CodecId {
    pub fn to_byte(self) -> u8 {
        match self {
            CodecId::H264 => 1,
            CodecId::Hevc => 2,
            CodecId::Aac => 3,
            CodecId::RawVideo => 4,
            CodecId::PcmS16 => 5,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(CodecId::H264),
            2 => Some(CodecId::Hevc),
            3 => Some(CodecId::Aac),
            4 => Some(CodecId::RawVideo),
            5 => Some(CodecId::PcmS16),
            _ => None,
        }
    }

    pub fn kind(self) -> MediaKind {
        match self {
            CodecId::H264 | CodecId::Hevc | CodecId::RawVideo => MediaKind::Video,
            CodecId::Aac | CodecId::PcmS16 => MediaKind::Audio,
        }
    }
}

/// Per-kind codec parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecParams {
    Video { width: u32, height: u32 },
    Audio { sample_rate: u32, channels: u8 },
}

/// One elementary stream inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Container stream index.
    pub index: u8,
    pub codec: CodecId,
    pub time_base: TimeBase,
    pub params: CodecParams,
}

impl StreamDescriptor {
    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }
}

// ─── Units ──────────────────────────────────────────────────────────────────

/// Which encoder output an access unit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Video,
    /// Audio mix / track number, starting at 0.
    Audio(u8),
}

/// Encoded output as handed over by the host encoder.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub track: Track,
    pub data: Bytes,
    pub pts: i64,
    pub dts: i64,
    /// Encoder time base of `pts`/`dts`.
    pub time_base: TimeBase,
    pub keyframe: bool,
}

/// A unit as carried by the container, timestamps in the stream's time base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    pub stream_index: u8,
    pub data: Bytes,
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_millis_to_mpeg() {
        assert_eq!(rescale(40, TimeBase::MILLIS, TimeBase::MPEG), 3600);
        assert_eq!(rescale(-40, TimeBase::MILLIS, TimeBase::MPEG), -3600);
        assert_eq!(rescale(3600, TimeBase::MPEG, TimeBase::MILLIS), 40);
    }

    #[test]
    fn rescale_rounds_half_away_from_zero() {
        // 1/3 s at 1/2 → 0.666 → 1; 1 tick at 1/90000 → ms 0.0111 → 0
        assert_eq!(rescale(1, TimeBase::new(1, 3), TimeBase::new(1, 2)), 1);
        assert_eq!(rescale(1, TimeBase::new(1, 4), TimeBase::new(1, 2)), 1);
        assert_eq!(rescale(-1, TimeBase::new(1, 4), TimeBase::new(1, 2)), -1);
        assert_eq!(rescale(1, TimeBase::MPEG, TimeBase::MILLIS), 0);
    }

    #[test]
    fn rescale_audio_sample_clock() {
        // 1024 samples at 48 kHz = 1920 ticks at 90 kHz
        assert_eq!(rescale(1024, TimeBase::new(1, 48_000), TimeBase::MPEG), 1920);
    }

    #[test]
    fn rescale_invalid_is_identity() {
        assert_eq!(rescale(123, TimeBase::new(0, 0), TimeBase::MPEG), 123);
    }

    #[test]
    fn rescale_does_not_overflow() {
        let ns = rescale(i64::MAX / 2, TimeBase::MPEG, TimeBase::NANOS);
        assert_eq!(ns, i64::MAX);
    }

    #[test]
    fn codec_bytes_round_trip() {
        for c in [
            CodecId::H264,
            CodecId::Hevc,
            CodecId::Aac,
            CodecId::RawVideo,
            CodecId::PcmS16,
        ] {
            assert_eq!(CodecId::from_byte(c.to_byte()), Some(c));
        }
        assert_eq!(CodecId::from_byte(0), None);
        assert_eq!(CodecId::Aac.kind(), MediaKind::Audio);
    }
}
