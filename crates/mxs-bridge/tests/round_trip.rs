//! End-to-end: access units pushed into a send bridge come out of a receive
//! bridge as frames, in order, for both the worker-driven and the
//! selector-driven receive paths, and across send failures and service
//! outages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use mxs_bridge::decode::i420_size;
use mxs_bridge::{
    AccessUnit, BridgeConfig, ChannelSink, CodecId, DropReason, PipelineParts, PipelineStatus,
    ReceiveBridge, ReceiveDrain, RelayMode, SendBridge, SinkFrame, TimeBase, Track, TrackSpec,
};
use mxs_transport::{MemoryService, MemoryServiceConfig, Selector, TransportError};

// ─── Helpers ────────────────────────────────────────────────────────────────

const W: u32 = 32;
const H: u32 = 18;

fn config(key: &str) -> BridgeConfig {
    let mut cfg = BridgeConfig::for_stream("https://h", "d1", key);
    cfg.receive.receive_timeout = Duration::from_millis(100);
    cfg
}

fn tracks(audio: u8) -> Vec<TrackSpec> {
    let mut t = vec![TrackSpec::video(CodecId::RawVideo, W, H)];
    t.extend((0..audio).map(|i| TrackSpec::audio(i, CodecId::PcmS16, 48_000, 2)));
    t
}

fn video(n: i64) -> AccessUnit {
    AccessUnit {
        track: Track::Video,
        data: Bytes::from(vec![n as u8; i420_size(W, H)]),
        pts: n * 40,
        dts: n * 40,
        time_base: TimeBase::MILLIS,
        keyframe: n % 10 == 0,
    }
}

fn audio(track: u8, n: i64) -> AccessUnit {
    AccessUnit {
        track: Track::Audio(track),
        data: Bytes::from(vec![track; 960 * 4]),
        pts: n * 20,
        dts: n * 20,
        time_base: TimeBase::MILLIS,
        keyframe: true,
    }
}

#[derive(Default)]
struct Collected {
    video_ts: Vec<i64>,
    audio: Vec<(usize, i64, u32)>,
}

fn collect(frames: &Receiver<SinkFrame>, into: &mut Collected) {
    for f in frames.try_iter() {
        match f {
            SinkFrame::Video(v) => {
                assert_eq!((v.width, v.height), (W, H));
                into.video_ts.push(v.timestamp_ns);
            }
            SinkFrame::Audio(a) => {
                into.audio
                    .push((a.planes[0].len(), a.timestamp_ns, a.frames));
            }
        }
    }
}

fn wait_for_video(frames: &Receiver<SinkFrame>, got: &mut Collected, want: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while got.video_ts.len() < want && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        collect(frames, got);
    }
}

fn drain_selector(selector: &mut Selector<ReceiveDrain>) {
    selector
        .poll(Duration::from_millis(20), |_, drain| {
            drain.drain();
        })
        .unwrap();
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[test]
fn units_arrive_as_frames_in_order() {
    let svc = MemoryService::new();
    let cfg = config("rt");
    let (sink, frames) = ChannelSink::new();
    let mut rx = ReceiveBridge::start(&svc, &cfg, PipelineParts::new(Arc::new(sink))).unwrap();
    let mut tx = SendBridge::start(&svc, &cfg, &tracks(1)).unwrap();

    const N: i64 = 30;
    for n in 0..N {
        tx.push(video(n)).unwrap();
        tx.push(audio(0, n)).unwrap();
    }

    let streams = rx.wait_ready(Duration::from_secs(5)).unwrap();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].codec, CodecId::RawVideo);
    assert_eq!(streams[1].codec, CodecId::PcmS16);

    let mut got = Collected::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while (got.video_ts.len() < N as usize || got.audio.len() < N as usize)
        && Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
        collect(&frames, &mut got);
    }

    let expected: Vec<i64> = (0..N).map(|n| n * 40_000_000).collect();
    assert_eq!(got.video_ts, expected);
    assert_eq!(got.audio.len(), N as usize);
    assert!(got.audio.iter().all(|&(len, _, frames)| len == 3840 && frames == 960));
    assert!(got.audio.windows(2).all(|w| w[0].1 < w[1].1));

    let sent = tx.stop();
    assert_eq!(sent.units_written, 2 * N as u64);
    assert_eq!(sent.units_dropped, 0);
    let received = rx.stop();
    assert_eq!(received.video_frames, N as u64);
    assert_eq!(received.audio_frames, N as u64);
    assert_eq!(received.decode_errors, 0);
}

#[test]
fn selector_driven_receive_delivers_everything() {
    let svc = MemoryService::new();
    let cfg = config("sel");
    let (sink, frames) = ChannelSink::new();
    let mut selector: Selector<ReceiveDrain> = Selector::new();
    let mut rx = ReceiveBridge::start_on_selector(
        &svc,
        &cfg,
        PipelineParts::new(Arc::new(sink)),
        &mut selector,
    )
    .unwrap();
    assert_eq!(selector.len(), 1);

    let mut tx = SendBridge::start(&svc, &cfg, &tracks(2)).unwrap();
    const N: i64 = 20;
    for n in 0..N {
        tx.push(video(n)).unwrap();
        tx.push(audio(0, n)).unwrap();
        tx.push(audio(1, n)).unwrap();
    }

    let mut got = Collected::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while (got.video_ts.len() < N as usize || got.audio.len() < 2 * N as usize)
        && Instant::now() < deadline
    {
        selector
            .poll(Duration::from_millis(20), |_, drain| {
                drain.drain();
            })
            .unwrap();
        collect(&frames, &mut got);
    }

    assert_eq!(got.video_ts.len(), N as usize);
    assert!(got.video_ts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(got.audio.len(), 2 * N as usize);

    tx.stop();
    let stats = rx.stop_on_selector(&mut selector);
    assert!(selector.is_empty());
    assert_eq!(stats.video_frames, N as u64);
    assert!(stats.queues.iter().all(|q| q.depth == 0));
    assert_eq!(svc.receiver_count("sel"), 0);
}

#[test]
fn small_receive_buffer_grows_and_nothing_is_lost() {
    let svc = MemoryService::new();
    let mut cfg = config("grow");
    cfg.receive.receive_buffer = 64;
    let (sink, frames) = ChannelSink::new();
    let mut rx = ReceiveBridge::start(&svc, &cfg, PipelineParts::new(Arc::new(sink))).unwrap();
    let mut tx = SendBridge::start(&svc, &cfg, &tracks(0)).unwrap();

    for n in 0..5 {
        tx.push(video(n)).unwrap();
    }
    let mut got = Collected::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while got.video_ts.len() < 5 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        collect(&frames, &mut got);
    }
    assert_eq!(got.video_ts.len(), 5);

    tx.stop();
    let stats = rx.stop();
    assert!(stats.buffer_resizes >= 1);
}

#[test]
fn udp_relay_round_trip() {
    let svc = MemoryService::new();
    let mut cfg = config("udp");
    cfg.receive.relay = RelayMode::Udp { port: 0 };
    let (sink, frames) = ChannelSink::new();
    let mut rx = ReceiveBridge::start(&svc, &cfg, PipelineParts::new(Arc::new(sink))).unwrap();
    let mut tx = SendBridge::start(&svc, &cfg, &tracks(1)).unwrap();

    for n in 0..10 {
        tx.push(video(n)).unwrap();
        tx.push(audio(0, n)).unwrap();
        // Loopback UDP has a finite receive buffer; pace the burst.
        std::thread::sleep(Duration::from_millis(2));
    }
    let mut got = Collected::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while got.video_ts.len() < 10 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        collect(&frames, &mut got);
    }
    assert_eq!(got.video_ts.len(), 10);

    tx.stop();
    rx.stop();
}

#[test]
fn unit_cut_by_send_failure_does_not_take_later_units() {
    let svc = MemoryService::with_config(MemoryServiceConfig {
        inbox_capacity: 4,
        ..Default::default()
    });
    let mut cfg = config("cut");
    cfg.send.again_retries = 0;
    let (sink, frames) = ChannelSink::new();
    let mut selector: Selector<ReceiveDrain> = Selector::new();
    // Nothing drains the inbox until the selector is polled.
    let mut rx = ReceiveBridge::start_on_selector(
        &svc,
        &cfg,
        PipelineParts::new(Arc::new(sink)),
        &mut selector,
    )
    .unwrap();
    let mut tx = SendBridge::start(&svc, &cfg, &tracks(0)).unwrap();

    // Stream table plus three chunks fill the inbox; the fourth chunk fails
    // and the fifth is withheld.
    let mut big = video(0);
    big.data = Bytes::from(vec![0u8; 6000]);
    let dropped = tx.push(big).unwrap_err();
    assert_eq!(dropped.reason, DropReason::Send(TransportError::Again));

    const N: i64 = 12;
    for n in 1..=N {
        drain_selector(&mut selector);
        tx.push(video(n)).unwrap();
    }

    let mut got = Collected::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while got.video_ts.len() < N as usize && Instant::now() < deadline {
        drain_selector(&mut selector);
        collect(&frames, &mut got);
    }
    let expected: Vec<i64> = (1..=N).map(|n| n * 40_000_000).collect();
    assert_eq!(got.video_ts, expected);

    let sent = tx.stop();
    assert_eq!(sent.units_written, N as u64);
    assert_eq!(sent.units_dropped, 1);
    assert_eq!(sent.send_failures, 1);
    assert_eq!(sent.chunks_discarded, 1);
    let received = rx.stop_on_selector(&mut selector);
    assert_eq!(received.video_frames, N as u64);
    assert_eq!(received.decode_errors, 0);
}

#[test]
fn receive_survives_service_unavailable_window() {
    let svc = MemoryService::new();
    let cfg = config("gap");
    let (sink, frames) = ChannelSink::new();
    let mut rx = ReceiveBridge::start(&svc, &cfg, PipelineParts::new(Arc::new(sink))).unwrap();
    let mut tx = SendBridge::start(&svc, &cfg, &tracks(0)).unwrap();

    let mut got = Collected::default();
    for n in 0..5 {
        tx.push(video(n)).unwrap();
    }
    wait_for_video(&frames, &mut got, 5);
    assert_eq!(got.video_ts.len(), 5);

    svc.set_unavailable("gap", true);
    std::thread::sleep(Duration::from_millis(150));
    assert!(rx.is_running());
    let dropped = tx.push(video(5)).unwrap_err();
    assert_eq!(
        dropped.reason,
        DropReason::Send(TransportError::ServiceUnavailable)
    );
    svc.set_unavailable("gap", false);

    for n in 6..11 {
        tx.push(video(n)).unwrap();
    }
    wait_for_video(&frames, &mut got, 10);
    let expected: Vec<i64> = (0..11)
        .filter(|&n| n != 5)
        .map(|n| n * 40_000_000)
        .collect();
    assert_eq!(got.video_ts, expected);
    assert!(rx.is_running());
    assert!(matches!(rx.status(), PipelineStatus::Ready(_)));

    tx.stop();
    let stats = rx.stop();
    assert_eq!(stats.video_frames, 10);
}
