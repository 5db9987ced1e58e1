//! # Format Translation
//!
//! Maps decoder-side pixel formats, sample formats and colour metadata to
//! the playback sink's representation. Unknown inputs map to the sink's
//! "none"/"unknown"/"default" values rather than failing.

use crate::media::frame::{
    ColorPrimaries, ColorRange, ColorSpace, ColorTransfer, DecodedAudio, DecodedVideo,
    PixelFormat, SampleFormat,
};
use crate::media::{rescale, TimeBase};
use crate::sink::{
    AudioFormat, AudioFrame, RangeType, SinkColorSpace, SpeakerLayout, VideoFormat, VideoFrame,
};

pub fn video_format(format: PixelFormat) -> VideoFormat {
    match format {
        PixelFormat::Yuv420p => VideoFormat::I420,
        PixelFormat::Nv12 => VideoFormat::Nv12,
        PixelFormat::Yuyv422 => VideoFormat::Yuy2,
        PixelFormat::Yvyu422 => VideoFormat::Yvyu,
        PixelFormat::Uyvy422 => VideoFormat::Uyvy,
        PixelFormat::Yuv422p => VideoFormat::I422,
        PixelFormat::Yuv422p10le => VideoFormat::I210,
        PixelFormat::Yuv444p => VideoFormat::I444,
        PixelFormat::Yuv444p12le => VideoFormat::I412,
        PixelFormat::Rgba => VideoFormat::Rgba,
        PixelFormat::Bgra => VideoFormat::Bgra,
        PixelFormat::Bgr0 => VideoFormat::Bgrx,
        PixelFormat::Yuva420p => VideoFormat::I40a,
        PixelFormat::Yuv420p10le => VideoFormat::I010,
        PixelFormat::Yuva422p => VideoFormat::I42a,
        PixelFormat::Yuva444p => VideoFormat::Yuva,
        PixelFormat::Yuva444p12le => VideoFormat::Ya2l,
        PixelFormat::P010le => VideoFormat::P010,
        PixelFormat::Gray8 => VideoFormat::Y800,
    }
}

pub fn audio_format(format: SampleFormat) -> AudioFormat {
    match format {
        SampleFormat::U8 => AudioFormat::U8,
        SampleFormat::S16 => AudioFormat::S16,
        SampleFormat::S32 => AudioFormat::S32,
        SampleFormat::Flt => AudioFormat::Float,
        SampleFormat::U8p => AudioFormat::U8Planar,
        SampleFormat::S16p => AudioFormat::S16Planar,
        SampleFormat::S32p => AudioFormat::S32Planar,
        SampleFormat::Fltp => AudioFormat::FloatPlanar,
        SampleFormat::Dbl => AudioFormat::Unknown,
    }
}

/// Sink colour space from matrix coefficients, refined by transfer and primaries.
pub fn color_space(
    space: ColorSpace,
    transfer: ColorTransfer,
    primaries: ColorPrimaries,
) -> SinkColorSpace {
    match space {
        ColorSpace::Bt709 => {
            if transfer == ColorTransfer::Iec61966_2_1 {
                SinkColorSpace::Srgb
            } else {
                SinkColorSpace::Cs709
            }
        }
        ColorSpace::Fcc
        | ColorSpace::Bt470bg
        | ColorSpace::Smpte170m
        | ColorSpace::Smpte240m => SinkColorSpace::Cs601,
        ColorSpace::Bt2020Ncl => hdr_space(transfer),
        ColorSpace::Unspecified => {
            if primaries == ColorPrimaries::Bt2020 {
                hdr_space(transfer)
            } else {
                SinkColorSpace::Default
            }
        }
    }
}

fn hdr_space(transfer: ColorTransfer) -> SinkColorSpace {
    if transfer == ColorTransfer::AribStdB67 {
        SinkColorSpace::Cs2100Hlg
    } else {
        SinkColorSpace::Cs2100Pq
    }
}

pub fn range(range: ColorRange) -> RangeType {
    match range {
        ColorRange::Jpeg => RangeType::Full,
        ColorRange::Mpeg | ColorRange::Unspecified => RangeType::Default,
    }
}

pub fn speaker_layout(channels: u8) -> SpeakerLayout {
    match channels {
        1 => SpeakerLayout::Mono,
        2 => SpeakerLayout::Stereo,
        3 => SpeakerLayout::TwoPointOne,
        4 => SpeakerLayout::FourPointZero,
        5 => SpeakerLayout::FourPointOne,
        6 => SpeakerLayout::FivePointOne,
        8 => SpeakerLayout::SevenPointOne,
        _ => SpeakerLayout::Unknown,
    }
}

pub fn to_sink_video(frame: DecodedVideo, time_base: TimeBase) -> VideoFrame {
    VideoFrame {
        format: video_format(frame.format),
        color_space: color_space(frame.color_space, frame.transfer, frame.primaries),
        range: range(frame.range),
        timestamp_ns: rescale(frame.pts, time_base, TimeBase::NANOS),
        planes: frame.planes,
        linesizes: frame.linesizes,
        width: frame.width,
        height: frame.height,
    }
}

pub fn to_sink_audio(frame: DecodedAudio, time_base: TimeBase) -> AudioFrame {
    AudioFrame {
        layout: speaker_layout(frame.channels),
        format: audio_format(frame.format),
        timestamp_ns: rescale(frame.pts, time_base, TimeBase::NANOS),
        planes: frame.planes,
        sample_rate: frame.sample_rate,
        frames: frame.samples,
    }
}
