//! Receive pipeline failure policy: empty stream tables abort the start,
//! decode errors and undecodable streams do not.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use mxs_bridge::decode::i420_size;
use mxs_bridge::packetizer::ChunkWriter;
use mxs_bridge::relay::RelayReader;
use mxs_bridge::{
    AccessUnit, BridgeConfig, BridgeError, ChannelSink, CodecId, ContainerFormat, DemuxError,
    Demuxer, EncodedUnit, Muxer, PipelineParts, PipelineStatus, ReceiveBridge, SendBridge,
    SinkFrame, StreamDescriptor, TimeBase, Track, TrackSpec,
};
use mxs_transport::MemoryService;

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Receive-only format whose stream table is always empty.
struct EmptyTable;

struct EmptyDemuxer;

impl Demuxer for EmptyDemuxer {
    fn probe_streams(&mut self) -> Result<Vec<StreamDescriptor>, DemuxError> {
        Ok(Vec::new())
    }

    fn read_next_unit(&mut self) -> Result<EncodedUnit, DemuxError> {
        Err(DemuxError::Eof)
    }
}

impl ContainerFormat for EmptyTable {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn open_muxer(
        &self,
        _writer: ChunkWriter,
        _streams: Vec<StreamDescriptor>,
    ) -> io::Result<Box<dyn Muxer>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "receive only"))
    }

    fn open_demuxer(&self, _input: RelayReader) -> Box<dyn Demuxer> {
        Box::new(EmptyDemuxer)
    }
}

fn config(key: &str) -> BridgeConfig {
    let mut cfg = BridgeConfig::for_stream("https://h", "d1", key);
    cfg.receive.receive_timeout = Duration::from_millis(100);
    cfg
}

fn unit(track: Track, data: Vec<u8>, pts: i64) -> AccessUnit {
    AccessUnit {
        track,
        data: Bytes::from(data),
        pts,
        dts: pts,
        time_base: TimeBase::MILLIS,
        keyframe: true,
    }
}

fn wait_for_frames(frames: &Receiver<SinkFrame>, want: usize) -> Vec<SinkFrame> {
    let mut got = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while got.len() < want && Instant::now() < deadline {
        got.extend(frames.try_iter());
        thread::sleep(Duration::from_millis(5));
    }
    got
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[test]
fn empty_stream_table_aborts_start() {
    let svc = MemoryService::new();
    let cfg = config("ns");
    let (sink, _frames) = ChannelSink::new();
    let mut parts = PipelineParts::new(Arc::new(sink));
    parts.format = Arc::new(EmptyTable);
    let mut rx = ReceiveBridge::start(&svc, &cfg, parts).unwrap();

    assert_eq!(svc.inject("ns", b"anything"), 1);
    assert!(matches!(
        rx.wait_ready(Duration::from_secs(5)),
        Err(BridgeError::NoStreams)
    ));
    assert!(!rx.is_running());
    assert_eq!(rx.status(), PipelineStatus::NoStreams);
    rx.stop();
    assert_eq!(rx.status(), PipelineStatus::NoStreams);
}

#[test]
fn missing_stream_table_times_out_probe() {
    let svc = MemoryService::new();
    let mut cfg = config("garbage");
    cfg.receive.probe_timeout = Duration::from_millis(200);
    let (sink, _frames) = ChannelSink::new();
    let rx = ReceiveBridge::start(&svc, &cfg, PipelineParts::new(Arc::new(sink))).unwrap();

    svc.inject("garbage", &[0x55; 300]);
    match rx.wait_ready(Duration::from_secs(5)) {
        Err(BridgeError::Pipeline(reason)) => assert!(reason.contains("stream table")),
        other => panic!("unexpected {:?}", other.map(|s| s.len())),
    }
}

#[test]
fn decode_error_is_skipped_and_decoding_continues() {
    let svc = MemoryService::new();
    let cfg = config("bad");
    let (sink, frames) = ChannelSink::new();
    let mut rx = ReceiveBridge::start(&svc, &cfg, PipelineParts::new(Arc::new(sink))).unwrap();
    let mut tx =
        SendBridge::start(&svc, &cfg, &[TrackSpec::video(CodecId::RawVideo, 8, 8)]).unwrap();

    tx.push(unit(Track::Video, vec![1, 2, 3], 0)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while rx.stats().decode_errors == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(rx.stats().decode_errors, 1);
    assert!(rx.is_running());

    for n in 1..=3 {
        tx.push(unit(Track::Video, vec![0; i420_size(8, 8)], n * 40))
            .unwrap();
    }
    assert_eq!(wait_for_frames(&frames, 3).len(), 3);

    tx.stop();
    let stats = rx.stop();
    assert_eq!(stats.video_frames, 3);
}

#[test]
fn stream_without_decoder_is_skipped() {
    let svc = MemoryService::new();
    let cfg = config("h264");
    let (sink, frames) = ChannelSink::new();
    let mut rx = ReceiveBridge::start(&svc, &cfg, PipelineParts::new(Arc::new(sink))).unwrap();
    let tracks = [
        TrackSpec::video(CodecId::H264, 1280, 720),
        TrackSpec::audio(0, CodecId::PcmS16, 48_000, 2),
    ];
    let mut tx = SendBridge::start(&svc, &cfg, &tracks).unwrap();

    for n in 0..3 {
        tx.push(unit(Track::Video, vec![0, 0, 0, 1, 0x65], n * 40))
            .unwrap();
        tx.push(unit(Track::Audio(0), vec![0; 400], n * 40)).unwrap();
    }

    let ready = rx.wait_ready(Duration::from_secs(5)).unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].codec, CodecId::PcmS16);

    let got = wait_for_frames(&frames, 3);
    assert_eq!(got.len(), 3);
    assert!(got.iter().all(|f| matches!(f, SinkFrame::Audio(_))));

    tx.stop();
    let stats = rx.stop();
    assert_eq!(stats.units_unrouted, 3);
    assert_eq!(stats.audio_frames, 3);
}
