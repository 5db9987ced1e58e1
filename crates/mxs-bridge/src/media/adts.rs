//! # ADTS Framing
//!
//! Raw AAC frames carry no length or sync information. Before such a frame
//! goes into the container it is prefixed with a 7-byte ADTS header
//! (MPEG-2 ID, no CRC) so a demuxer can find frame boundaries on its own.
//!
//! ```text
//!  byte 0     1          2                    3            4        5             6
//!  FF      F9   | prof-1:2 freq:4 0 ch>>2 | ch&3:2 0000 len>>11 | len>>3 | len&7:3 11111 | FC
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const ADTS_HEADER_LEN: usize = 7;

/// Largest frame length expressible in the 13-bit length field.
pub const MAX_FRAME_LEN: usize = 0x1FFF;

/// Sampling frequency table, indexed by the header's 4-bit frequency field.
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdtsError {
    #[error("sample rate {0} Hz has no ADTS frequency index")]
    UnsupportedSampleRate(u32),
    #[error("{0} channels do not fit the 3-bit channel configuration")]
    TooManyChannels(u8),
    #[error("audio object type {0} outside 1..=4")]
    InvalidProfile(u8),
    #[error("frame of {0} bytes exceeds the 13-bit length field")]
    FrameTooLarge(usize),
}

/// Stream-level parameters written into every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsConfig {
    /// MPEG-4 audio object type (2 = AAC-LC).
    pub profile: u8,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for AdtsConfig {
    fn default() -> Self {
        Self {
            profile: 2,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl AdtsConfig {
    pub fn frequency_index(&self) -> Option<u8> {
        SAMPLE_RATES
            .iter()
            .position(|&r| r == self.sample_rate)
            .map(|i| i as u8)
    }

    fn check(&self) -> Result<u8, AdtsError> {
        if !(1..=4).contains(&self.profile) {
            return Err(AdtsError::InvalidProfile(self.profile));
        }
        if self.channels > 7 {
            return Err(AdtsError::TooManyChannels(self.channels));
        }
        self.frequency_index()
            .ok_or(AdtsError::UnsupportedSampleRate(self.sample_rate))
    }
}

/// Write the header for a payload of `payload_len` bytes.
pub fn write_header(
    cfg: &AdtsConfig,
    payload_len: usize,
    out: &mut BytesMut,
) -> Result<(), AdtsError> {
    let freq = cfg.check()?;
    let len = payload_len + ADTS_HEADER_LEN;
    if len > MAX_FRAME_LEN {
        return Err(AdtsError::FrameTooLarge(len));
    }
    let chan = cfg.channels;
    out.reserve(ADTS_HEADER_LEN);
    out.put_u8(0xFF);
    out.put_u8(0xF9);
    out.put_u8(((cfg.profile - 1) << 6) | (freq << 2) | (chan >> 2));
    out.put_u8(((chan & 3) << 6) | (len >> 11) as u8);
    out.put_u8(((len & 0x7FF) >> 3) as u8);
    out.put_u8((((len & 7) as u8) << 5) | 0x1F);
    out.put_u8(0xFC);
    Ok(())
}

/// Header followed by `payload`.
pub fn wrap(cfg: &AdtsConfig, payload: &[u8]) -> Result<Bytes, AdtsError> {
    let mut out = BytesMut::with_capacity(ADTS_HEADER_LEN + payload.len());
    write_header(cfg, payload.len(), &mut out)?;
    out.extend_from_slice(payload);
    Ok(out.freeze())
}

/// Return `payload` unchanged when it already is exactly one ADTS frame,
/// otherwise wrap it.
pub fn ensure_framed(cfg: &AdtsConfig, payload: &Bytes) -> Result<Bytes, AdtsError> {
    match parse_header(payload) {
        Some(h) if h.frame_len == payload.len() => Ok(payload.clone()),
        _ => wrap(cfg, payload),
    }
}

/// Fields decoded from an ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub profile: u8,
    pub frequency_index: u8,
    pub channels: u8,
    /// Header plus payload.
    pub frame_len: usize,
    pub header_len: usize,
}

impl AdtsHeader {
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.frequency_index as usize).copied()
    }

    pub fn payload_len(&self) -> usize {
        self.frame_len - self.header_len
    }
}

pub fn parse_header(data: &[u8]) -> Option<AdtsHeader> {
    if data.len() < ADTS_HEADER_LEN || data[0] != 0xFF || data[1] & 0xF6 != 0xF0 {
        return None;
    }
    let protection_absent = data[1] & 1 == 1;
    let header_len = if protection_absent { 7 } else { 9 };
    let frame_len = (((data[3] & 0x03) as usize) << 11)
        | ((data[4] as usize) << 3)
        | ((data[5] >> 5) as usize);
    if frame_len < header_len {
        return None;
    }
    Some(AdtsHeader {
        profile: (data[2] >> 6) + 1,
        frequency_index: (data[2] >> 2) & 0x0F,
        channels: ((data[2] & 0x01) << 2) | (data[3] >> 6),
        frame_len,
        header_len,
    })
}

/// Payload of a single ADTS frame, or `None` if `data` is not one.
pub fn strip(data: &Bytes) -> Option<Bytes> {
    let h = parse_header(data)?;
    if h.frame_len > data.len() {
        return None;
    }
    Some(data.slice(h.header_len..h.frame_len))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
