//! # Decoder Seam
//!
//! Decode workers drive a [`Decoder`] with the usual feed/drain protocol:
//! every unit is sent once, then frames are pulled until the decoder asks
//! for more input. [`RawDecoders`] covers the uncompressed codecs; hosts
//! plug real codec libraries in through [`DecoderFactory`].

use std::collections::VecDeque;

use thiserror::Error;

use crate::media::frame::{
    ColorPrimaries, ColorRange, ColorSpace, ColorTransfer, DecodedAudio, DecodedFrame,
    DecodedVideo, PixelFormat, SampleFormat,
};
use crate::media::{CodecId, CodecParams, EncodedUnit, StreamDescriptor};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no decoder for {0:?}")]
    Unsupported(CodecId),
    #[error("corrupt unit: {0}")]
    Corrupt(String),
}

#[derive(Debug)]
pub enum DecodeStatus {
    Frame(DecodedFrame),
    /// Nothing more until the next unit is sent.
    NeedMoreInput,
}

pub trait Decoder: Send {
    fn send_unit(&mut self, unit: &EncodedUnit) -> Result<(), DecodeError>;
    fn receive_frame(&mut self) -> Result<DecodeStatus, DecodeError>;
}

pub trait DecoderFactory: Send + Sync {
    fn open(&self, stream: &StreamDescriptor) -> Result<Box<dyn Decoder>, DecodeError>;
}

// ─── Raw Codecs ─────────────────────────────────────────────────────────────

/// Unpacks planar 4:2:0 video and interleaved s16 PCM.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoders;

impl DecoderFactory for RawDecoders {
    fn open(&self, stream: &StreamDescriptor) -> Result<Box<dyn Decoder>, DecodeError> {
        match (stream.codec, stream.params) {
            (CodecId::RawVideo, CodecParams::Video { width, height }) => {
                if width == 0 || height == 0 {
                    return Err(DecodeError::Corrupt(format!(
                        "video size {}x{}",
                        width, height
                    )));
                }
                Ok(Box::new(RawVideoDecoder {
                    width,
                    height,
                    ready: VecDeque::new(),
                }))
            }
            (
                CodecId::PcmS16,
                CodecParams::Audio {
                    sample_rate,
                    channels,
                },
            ) => {
                if channels == 0 {
                    return Err(DecodeError::Corrupt("zero audio channels".into()));
                }
                Ok(Box::new(PcmDecoder {
                    sample_rate,
                    channels,
                    ready: VecDeque::new(),
                }))
            }
            (codec, _) => Err(DecodeError::Unsupported(codec)),
        }
    }
}

/// Byte size of one planar 4:2:0 picture.
pub fn i420_size(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    w * h + 2 * cw * ch
}

struct RawVideoDecoder {
    width: u32,
    height: u32,
    ready: VecDeque<DecodedFrame>,
}

impl Decoder for RawVideoDecoder {
    fn send_unit(&mut self, unit: &EncodedUnit) -> Result<(), DecodeError> {
        let expected = i420_size(self.width, self.height);
        if unit.data.len() != expected {
            return Err(DecodeError::Corrupt(format!(
                "picture of {} bytes, expected {}",
                unit.data.len(),
                expected
            )));
        }
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let y_end = w * h;
        let u_end = y_end + cw * ch;
        self.ready.push_back(DecodedFrame::Video(DecodedVideo {
            planes: vec![
                unit.data.slice(..y_end),
                unit.data.slice(y_end..u_end),
                unit.data.slice(u_end..),
            ],
            linesizes: vec![w, cw, cw],
            width: self.width,
            height: self.height,
            format: PixelFormat::Yuv420p,
            color_space: ColorSpace::Bt709,
            transfer: ColorTransfer::Bt709,
            primaries: ColorPrimaries::Bt709,
            range: ColorRange::Mpeg,
            pts: unit.pts,
        }));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus, DecodeError> {
        Ok(self
            .ready
            .pop_front()
            .map(DecodeStatus::Frame)
            .unwrap_or(DecodeStatus::NeedMoreInput))
    }
}

struct PcmDecoder {
    sample_rate: u32,
    channels: u8,
    ready: VecDeque<DecodedFrame>,
}

impl Decoder for PcmDecoder {
    fn send_unit(&mut self, unit: &EncodedUnit) -> Result<(), DecodeError> {
        let frame_bytes = 2 * self.channels as usize;
        if unit.data.is_empty() || unit.data.len() % frame_bytes != 0 {
            return Err(DecodeError::Corrupt(format!(
                "{} bytes is not a whole number of {}-channel s16 frames",
                unit.data.len(),
                self.channels
            )));
        }
        self.ready.push_back(DecodedFrame::Audio(DecodedAudio {
            planes: vec![unit.data.clone()],
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: SampleFormat::S16,
            samples: (unit.data.len() / frame_bytes) as u32,
            pts: unit.pts,
        }));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus, DecodeError> {
        Ok(self
            .ready
            .pop_front()
            .map(DecodeStatus::Frame)
            .unwrap_or(DecodeStatus::NeedMoreInput))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TimeBase;
    use bytes::Bytes;

    fn stream(codec: CodecId, params: CodecParams) -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            codec,
            time_base: TimeBase::MPEG,
            params,
        }
    }

    fn unit(data: Vec<u8>, pts: i64) -> EncodedUnit {
        EncodedUnit {
            stream_index: 0,
            data: Bytes::from(data),
            pts,
            dts: pts,
            keyframe: true,
        }
    }

    #[test]
    fn raw_video_splits_planes() {
        let s = stream(
            CodecId::RawVideo,
            CodecParams::Video {
                width: 4,
                height: 2,
            },
        );
        let mut dec = RawDecoders.open(&s).unwrap();
        assert_eq!(i420_size(4, 2), 12);
        dec.send_unit(&unit((0..12).collect(), 90)).unwrap();
        match dec.receive_frame().unwrap() {
            DecodeStatus::Frame(DecodedFrame::Video(v)) => {
                assert_eq!(v.planes[0].as_ref(), &[0, 1, 2, 3, 4, 5, 6, 7]);
                assert_eq!(v.planes[1].as_ref(), &[8, 9]);
                assert_eq!(v.planes[2].as_ref(), &[10, 11]);
                assert_eq!(v.linesizes, vec![4, 2, 2]);
                assert_eq!(v.pts, 90);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            dec.receive_frame().unwrap(),
            DecodeStatus::NeedMoreInput
        ));
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        assert_eq!(i420_size(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn wrong_picture_size_is_corrupt() {
        let s = stream(
            CodecId::RawVideo,
            CodecParams::Video {
                width: 4,
                height: 2,
            },
        );
        let mut dec = RawDecoders.open(&s).unwrap();
        assert!(matches!(
            dec.send_unit(&unit(vec![0; 5], 0)),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[test]
    fn pcm_counts_samples() {
        let s = stream(
            CodecId::PcmS16,
            CodecParams::Audio {
                sample_rate: 48_000,
                channels: 2,
            },
        );
        let mut dec = RawDecoders.open(&s).unwrap();
        dec.send_unit(&unit(vec![0; 40], 0)).unwrap();
        match dec.receive_frame().unwrap() {
            DecodeStatus::Frame(DecodedFrame::Audio(a)) => assert_eq!(a.samples, 10),
            other => panic!("unexpected {:?}", other),
        }
        assert!(dec.send_unit(&unit(vec![0; 3], 0)).is_err());
    }

    #[test]
    fn compressed_codecs_are_unsupported() {
        let s = stream(
            CodecId::Aac,
            CodecParams::Audio {
                sample_rate: 48_000,
                channels: 2,
            },
        );
        assert!(matches!(
            RawDecoders.open(&s),
            Err(DecodeError::Unsupported(CodecId::Aac))
        ));
    }
}
