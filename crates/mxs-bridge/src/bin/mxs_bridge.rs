//! # mxs-bridge demo
//!
//! Runs a send bridge and a receive bridge against the in-process transport
//! service. Synthetic raw video and PCM access units go out through the
//! packetizer and come back as frames on a channel sink.
//!
//! ## Usage
//!
//! ```bash
//! # 10 seconds of 25 fps video with one audio track
//! mxs-bridge --units 250
//!
//! # Receive on the main thread through a selector, two audio tracks
//! mxs-bridge --selector --audio-tracks 2
//!
//! # Run until Ctrl-C with settings from a file
//! mxs-bridge --config bridge.toml --units 0
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use crossbeam_channel::Receiver;
use mxs_bridge::decode::i420_size;
use mxs_bridge::{
    AccessUnit, BridgeConfig, BridgeError, ChannelSink, CodecId, PipelineParts, PipelineStatus,
    ReceiveBridge, ReceiveDrain, SendBridge, SinkFrame, TimeBase, Track, TrackSpec,
};
use mxs_transport::{MemoryService, Selector};
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;
const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u8 = 2;

/// Bridge demo over the in-process transport.
#[derive(Parser, Debug)]
#[command(name = "mxs-bridge", about = "Send and receive a synthetic stream through mxs sessions")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Video frames to send; 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 250)]
    units: u64,

    /// Frames per second of the synthetic video.
    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Number of PCM audio tracks.
    #[arg(long, default_value_t = 1)]
    audio_tracks: u8,

    /// Receive through a selector on the main thread instead of a worker.
    #[arg(long, default_value_t = false)]
    selector: bool,

    /// Stream key override.
    #[arg(long)]
    stream_key: Option<String>,

    /// Seed for the synthetic picture noise.
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let fps = cli.fps.clamp(1, 120);

    tracing::info!(
        server = %cfg.stream.server_url,
        stream = %cfg.stream.stream_key,
        units = cli.units,
        fps,
        audio_tracks = cli.audio_tracks,
        selector = cli.selector,
        "mxs-bridge starting"
    );

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    // ── Bridges ─────────────────────────────────────────────────
    let service = MemoryService::new();
    let (sink, frames) = ChannelSink::new();
    let parts = PipelineParts::new(Arc::new(sink));

    let mut selector: Option<Selector<ReceiveDrain>> = cli.selector.then(Selector::new);
    let mut rx = match selector.as_mut() {
        Some(sel) => ReceiveBridge::start_on_selector(&service, &cfg, parts, sel)?,
        None => ReceiveBridge::start(&service, &cfg, parts)?,
    };

    let mut tracks = vec![TrackSpec::video(CodecId::RawVideo, WIDTH, HEIGHT)];
    tracks.extend(
        (0..cli.audio_tracks).map(|i| TrackSpec::audio(i, CodecId::PcmS16, SAMPLE_RATE, CHANNELS)),
    );
    let mut tx = SendBridge::start(&service, &cfg, &tracks)?;
    tx.set_drop_observer(Box::new(|d| {
        tracing::debug!(track = ?d.track, pts = d.pts, reason = ?d.reason, "encoder notified of drop");
    }));

    // ── Stream ──────────────────────────────────────────────────
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let frame_interval = Duration::from_secs(1) / fps;
    let mut counts = FrameCounts::default();
    let mut reported_ready = false;
    let mut n: u64 = 0;
    let mut next_frame = Instant::now();

    while running.load(Ordering::SeqCst) && (cli.units == 0 || n < cli.units) {
        let pts_ms = (n * 1000 / fps as u64) as i64;
        let _ = tx.push(video_unit(&mut rng, n, pts_ms));
        for track in 0..cli.audio_tracks {
            let _ = tx.push(audio_unit(track, n, pts_ms, fps));
        }
        n += 1;

        next_frame += frame_interval;
        service_receive(selector.as_mut(), next_frame);
        counts.collect(&frames);

        if !reported_ready {
            if let PipelineStatus::Ready(streams) = rx.status() {
                tracing::info!(streams = streams.len(), "receive side ready");
                reported_ready = true;
            }
        }
        if !rx.is_running() {
            tracing::error!(status = ?rx.status(), "receive pipeline stopped unexpectedly");
            break;
        }
        if n % fps as u64 == 0 {
            tracing::info!(
                sent = n,
                video_frames = counts.video,
                audio_frames = counts.audio,
                "progress"
            );
        }
    }

    // Let the tail through before stopping.
    let tail = Instant::now() + Duration::from_millis(300);
    while Instant::now() < tail {
        service_receive(selector.as_mut(), Instant::now() + Duration::from_millis(20));
        counts.collect(&frames);
    }

    // ── Shutdown ────────────────────────────────────────────────
    let send_stats = tx.stop();
    let receive_stats = match selector.as_mut() {
        Some(sel) => rx.stop_on_selector(sel),
        None => rx.stop(),
    };
    if let Some(sel) = selector.take() {
        drop(sel.destroy());
    }
    counts.collect(&frames);

    tracing::info!(stats = %serde_json::to_string(&send_stats)?, "send stats");
    tracing::info!(stats = %serde_json::to_string(&receive_stats)?, "receive stats");
    tracing::info!(
        sent = n,
        video_frames = counts.video,
        audio_frames = counts.audio,
        "mxs-bridge finished"
    );
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            BridgeConfig::from_toml_str(&text).map_err(BridgeError::Config)?
        }
        None => BridgeConfig::default(),
    };
    if cfg.stream.server_url.is_empty() {
        cfg.stream.server_url = "mem://local".into();
    }
    if cfg.stream.device_id.is_empty() {
        cfg.stream.device_id = "demo-device".into();
    }
    if let Some(key) = &cli.stream_key {
        cfg.stream.stream_key = key.trim().to_string();
    }
    if cfg.stream.stream_key.is_empty() {
        cfg.stream.stream_key = "demo".into();
    }
    Ok(cfg)
}

/// Poll the selector until `until`, or just sleep when a worker receives.
fn service_receive(selector: Option<&mut Selector<ReceiveDrain>>, until: Instant) {
    let Some(selector) = selector else {
        std::thread::sleep(until.saturating_duration_since(Instant::now()));
        return;
    };
    loop {
        let left = until.saturating_duration_since(Instant::now());
        if let Err(e) = selector.poll(left, |_, drain| {
            drain.drain();
        }) {
            tracing::warn!(code = %e, "selector poll failed");
            std::thread::sleep(left);
            return;
        }
        if left.is_zero() {
            return;
        }
    }
}

#[derive(Default)]
struct FrameCounts {
    video: u64,
    audio: u64,
}

impl FrameCounts {
    fn collect(&mut self, frames: &Receiver<SinkFrame>) {
        for frame in frames.try_iter() {
            match frame {
                SinkFrame::Video(_) => self.video += 1,
                SinkFrame::Audio(_) => self.audio += 1,
            }
        }
    }
}

fn video_unit(rng: &mut StdRng, n: u64, pts_ms: i64) -> AccessUnit {
    let size = i420_size(WIDTH, HEIGHT);
    let luma = (WIDTH * HEIGHT) as usize;
    let data: Vec<u8> = (0..size)
        .map(|i| {
            if i < luma {
                let x = (i % WIDTH as usize) as u64;
                (x * 4 + n) as u8 ^ (rng.random::<u8>() & 0x0F)
            } else {
                128
            }
        })
        .collect();
    AccessUnit {
        track: Track::Video,
        data: Bytes::from(data),
        pts: pts_ms,
        dts: pts_ms,
        time_base: TimeBase::MILLIS,
        keyframe: n % 50 == 0,
    }
}

fn audio_unit(track: u8, n: u64, pts_ms: i64, fps: u32) -> AccessUnit {
    let samples = (SAMPLE_RATE / fps) as u64;
    let pitch = 220.0 * (track as f64 + 1.0);
    let mut data = Vec::with_capacity(samples as usize * CHANNELS as usize * 2);
    for s in 0..samples {
        let t = (n * samples + s) as f64 / SAMPLE_RATE as f64;
        let v = ((t * pitch * std::f64::consts::TAU).sin() * 8000.0) as i16;
        for _ in 0..CHANNELS {
            data.extend_from_slice(&v.to_le_bytes());
        }
    }
    AccessUnit {
        track: Track::Audio(track),
        data: Bytes::from(data),
        pts: pts_ms,
        dts: pts_ms,
        time_base: TimeBase::MILLIS,
        keyframe: true,
    }
}
