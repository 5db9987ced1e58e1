//! # mxs-bridge
//!
//! Connects a host's encode and playback pipelines to mxs transport
//! sessions.
//!
//! The send side muxes encoded access units into a container byte stream and
//! cuts it into transport packets of at most 1316 bytes. The receive side
//! relays received packets to a demuxer, fans the elementary streams out to
//! one decode worker each and delivers converted frames to a
//! [`PlaybackSink`].

pub mod bridge;
pub mod config;
pub mod container;
pub mod convert;
pub mod decode;
pub mod error;
pub mod media;
pub mod packetizer;
pub mod pipeline;
pub mod queue;
pub mod relay;
pub mod sink;
pub mod stats;

pub use bridge::{open_connected, ReceiveBridge, SendBridge};
pub use config::{BridgeConfig, ReceiveConfig, SendConfig};
pub use container::{ContainerFormat, DemuxError, Demuxer, FramedFormat, Muxer};
pub use decode::{DecodeError, DecodeStatus, Decoder, DecoderFactory, RawDecoders};
pub use error::{BridgeError, Disposition};
pub use media::{AccessUnit, CodecId, CodecParams, EncodedUnit, StreamDescriptor, TimeBase, Track};
pub use packetizer::{DropReason, DroppedUnit, TrackSpec};
pub use pipeline::{PipelineParts, PipelineStatus, ReceiveDrain, ReceivePipeline};
pub use queue::QueuePolicy;
pub use relay::RelayMode;
pub use sink::{AudioFrame, ChannelSink, PlaybackSink, SinkFrame, VideoFrame};
pub use stats::{PipelineStatsSnapshot, SendStatsSnapshot};
