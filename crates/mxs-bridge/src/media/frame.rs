//! Decoded frames as produced by a [`Decoder`](crate::decode::Decoder),
//! described in decoder-side terms. [`convert`](crate::convert) maps them to
//! the playback sink's vocabulary.

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420p,
    Yuyv422,
    Yuv422p,
    Yuv422p10le,
    Yuv444p,
    Yuv444p12le,
    Uyvy422,
    Yvyu422,
    Nv12,
    Rgba,
    Bgra,
    Yuva420p,
    Yuv420p10le,
    Yuva422p,
    Yuva444p,
    Yuva444p12le,
    Bgr0,
    P010le,
    Gray8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    Flt,
    U8p,
    S16p,
    S32p,
    Fltp,
    Dbl,
}

/// Matrix coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Bt709,
    Fcc,
    Bt470bg,
    Smpte170m,
    Smpte240m,
    Bt2020Ncl,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTransfer {
    /// sRGB curve.
    Iec61966_2_1,
    /// Hybrid log-gamma.
    AribStdB67,
    Smpte2084,
    Bt709,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorPrimaries {
    Bt709,
    Bt2020,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRange {
    /// Full swing.
    Jpeg,
    /// Studio swing.
    Mpeg,
    Unspecified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedVideo {
    pub planes: Vec<Bytes>,
    /// Bytes per row, one entry per plane.
    pub linesizes: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub color_space: ColorSpace,
    pub transfer: ColorTransfer,
    pub primaries: ColorPrimaries,
    pub range: ColorRange,
    /// Presentation time in the stream time base.
    pub pts: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub planes: Vec<Bytes>,
    pub sample_rate: u32,
    pub channels: u8,
    pub format: SampleFormat,
    /// Samples per channel.
    pub samples: u32,
    pub pts: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Video(DecodedVideo),
    Audio(DecodedAudio),
}
