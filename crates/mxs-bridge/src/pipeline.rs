//! # Receive Pipeline
//!
//! Four kinds of worker, all stopped through one shared `running` flag:
//!
//! - **receive** (`mxs-rcv-net`): pulls packets off the transport session and
//!   relays the bytes unchanged. Absent in selector mode, where the caller's
//!   poll loop drives [`ReceiveDrain::drain`] instead.
//! - **demux** (`mxs-rcv-demux`): waits for the first relayed byte, probes the
//!   stream table, opens one decoder per selected stream and routes units to
//!   the per-stream queues.
//! - **decode** (`mxs-dec-video`, `mxs-dec-audio-N`): swaps its queue into a
//!   private batch, decodes and hands converted frames to the sink.
//!
//! Stop joins video, then audio, then demux, then receive; queues are
//! cleared and decoders released only after every worker has exited.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mxs_transport::{Selectable, Session, TransportError};
use tracing::{debug, error, info, trace, warn};

use crate::config::ReceiveConfig;
use crate::container::{ContainerFormat, DemuxError, Demuxer, FramedFormat};
use crate::convert::{to_sink_audio, to_sink_video};
use crate::decode::{DecodeError, DecodeStatus, Decoder, DecoderFactory, RawDecoders};
use crate::error::{disposition, BridgeError, Disposition};
use crate::media::frame::DecodedFrame;
use crate::media::{EncodedUnit, MediaKind, StreamDescriptor};
use crate::queue::{PushOutcome, QueuePolicy, StreamQueue};
use crate::relay::{self, RelayReader, RelayWriter};
use crate::sink::PlaybackSink;
use crate::stats::{PipelineStats, PipelineStatsSnapshot, QueueSnapshot};

/// Read timeout of the demux side of the relay.
const RELAY_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Demux sleep while nothing has been relayed yet, or no record is complete.
const DEMUX_IDLE: Duration = Duration::from_millis(10);
/// Decode worker wait for its queue to become non-empty.
const QUEUE_WAIT: Duration = Duration::from_millis(10);

// ─── Shared State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStatus {
    Starting,
    /// Streams that got a decode worker.
    Ready(Vec<StreamDescriptor>),
    /// The stream table holds no video or audio stream.
    NoStreams,
    Failed(String),
    Stopped,
}

struct Shared {
    running: AtomicBool,
    data_arrived: AtomicBool,
    stats: PipelineStats,
    status: Mutex<PipelineStatus>,
    status_cv: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            data_arrived: AtomicBool::new(false),
            stats: PipelineStats::default(),
            status: Mutex::new(PipelineStatus::Starting),
            status_cv: Condvar::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn status(&self) -> MutexGuard<'_, PipelineStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: PipelineStatus) {
        *self.status() = status;
        self.status_cv.notify_all();
    }

    /// Record a terminal failure and tell every worker to wind down.
    fn abort(&self, status: PipelineStatus) {
        self.running.store(false, Ordering::Release);
        self.set_status(status);
    }
}

/// Decode workers and their queues, filled in by the demux worker.
#[derive(Default)]
struct Registry {
    /// Set by stop; the demux worker spawns nothing afterwards.
    closed: bool,
    video: Option<JoinHandle<Box<dyn Decoder>>>,
    audio: Vec<JoinHandle<Box<dyn Decoder>>>,
    queues: Vec<(u8, Arc<StreamQueue>)>,
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

// ─── Receive Drain ──────────────────────────────────────────────────────────

/// Outcome of one receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStep {
    /// A packet of this many bytes was relayed.
    Relayed(usize),
    /// The buffer grew to this size; the packet is still pending.
    Resized(usize),
    /// Nothing queued (`Again`).
    Idle,
    /// Recoverable condition other than an empty inbox.
    Retry(TransportError),
    /// Receiving cannot continue.
    Abort(TransportError),
}

/// A receive session plus the relay it feeds. Driven either by the receive
/// worker or, registered with a [`Selector`](mxs_transport::Selector), by
/// the caller's poll loop.
pub struct ReceiveDrain {
    session: Session,
    relay: Option<RelayWriter>,
    buf: Vec<u8>,
    shared: Arc<Shared>,
}

impl Selectable for ReceiveDrain {
    fn session(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl ReceiveDrain {
    fn new(session: Session, relay: RelayWriter, buf_size: usize, shared: Arc<Shared>) -> Self {
        Self {
            session,
            relay: Some(relay),
            buf: vec![0u8; buf_size],
            shared,
        }
    }

    pub fn receive_once(&mut self, timeout: Duration) -> DrainStep {
        let stats = &self.shared.stats;
        let err = match self.session.receive(&mut self.buf, timeout) {
            Ok(n) => {
                stats.packets_received.inc();
                if let Some(relay) = &self.relay {
                    match relay.send(&self.buf[..n]) {
                        Ok(()) => stats.bytes_relayed.add(n as u64),
                        Err(e) => {
                            stats.relay_errors.inc();
                            debug!(session = %self.session.id(), error = %e, "relay send failed");
                        }
                    }
                }
                if !self.shared.data_arrived.swap(true, Ordering::AcqRel) {
                    debug!(session = %self.session.id(), bytes = n, "first packet relayed");
                }
                return DrainStep::Relayed(n);
            }
            Err(e) => e,
        };

        match disposition(&err) {
            Disposition::Resize(required) if required > self.buf.len() => {
                debug!(from = self.buf.len(), to = required, "growing receive buffer");
                self.buf.resize(required, 0);
                stats.buffer_resizes.inc();
                DrainStep::Resized(required)
            }
            Disposition::Resize(required) => {
                warn!(
                    required,
                    have = self.buf.len(),
                    "buffer reported too small but already large enough"
                );
                DrainStep::Abort(err)
            }
            Disposition::Backoff if err == TransportError::Again => DrainStep::Idle,
            Disposition::Backoff => {
                warn!(session = %self.session.id(), code = %err, "receive unavailable, retrying");
                DrainStep::Retry(err)
            }
            Disposition::Continue => {
                warn!(session = %self.session.id(), code = %err, "receive error");
                DrainStep::Retry(err)
            }
            Disposition::Abort => DrainStep::Abort(err),
        }
    }

    /// Receive until the inbox is empty. Selector callbacks must call this
    /// so the next readiness edge is not missed. Returns packets relayed.
    pub fn drain(&mut self) -> usize {
        let mut relayed = 0;
        while self.shared.is_running() {
            match self.receive_once(Duration::ZERO) {
                DrainStep::Relayed(_) => relayed += 1,
                DrainStep::Resized(_) => {}
                DrainStep::Idle | DrainStep::Retry(_) => break,
                DrainStep::Abort(e) => {
                    error!(session = %self.session.id(), code = %e, "receive aborted");
                    self.shared
                        .abort(PipelineStatus::Failed(format!("receive failed: {}", e)));
                    self.close_relay();
                    break;
                }
            }
        }
        relayed
    }

    /// Send the stop sentinel so the demuxer wakes. Later packets are not relayed.
    pub fn close_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.close();
        }
    }

    /// Close the relay and hand back the session.
    pub fn into_session(mut self) -> Session {
        self.close_relay();
        self.session
    }
}

fn receive_loop(mut drain: ReceiveDrain, timeout: Duration, backoff: Duration) -> ReceiveDrain {
    info!(session = %drain.session.id(), "receive worker started");
    while drain.shared.is_running() {
        match drain.receive_once(timeout) {
            DrainStep::Relayed(_) | DrainStep::Resized(_) => {}
            DrainStep::Idle | DrainStep::Retry(_) => thread::sleep(backoff),
            DrainStep::Abort(e) => {
                error!(session = %drain.session.id(), code = %e, "receive aborted");
                drain
                    .shared
                    .abort(PipelineStatus::Failed(format!("receive failed: {}", e)));
                break;
            }
        }
    }
    drain.close_relay();
    debug!(session = %drain.session.id(), "receive worker exiting");
    drain
}

// ─── Routing ────────────────────────────────────────────────────────────────

/// Stream index to queue map used by the demux worker.
#[derive(Default)]
pub struct Router {
    routes: HashMap<u8, Arc<StreamQueue>>,
}

impl Router {
    pub fn insert(&mut self, stream_index: u8, queue: Arc<StreamQueue>) {
        self.routes.insert(stream_index, queue);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Queue `unit` for its stream. Returns false if the stream has no queue
    /// or the unit was abandoned on stop.
    pub fn route(&self, unit: EncodedUnit, running: &AtomicBool, stats: &PipelineStats) -> bool {
        let Some(queue) = self.routes.get(&unit.stream_index) else {
            stats.units_unrouted.inc();
            trace!(stream = unit.stream_index, "unit for unselected stream");
            return false;
        };
        match queue.push(unit, running) {
            PushOutcome::Queued | PushOutcome::Evicted => {
                stats.units_routed.inc();
                true
            }
            PushOutcome::Abandoned => false,
        }
    }
}

/// The first video stream and every audio stream, in table order.
pub fn select_streams(streams: &[StreamDescriptor]) -> Vec<StreamDescriptor> {
    let mut have_video = false;
    streams
        .iter()
        .filter(|s| match s.kind() {
            MediaKind::Video => !std::mem::replace(&mut have_video, true),
            MediaKind::Audio => true,
        })
        .cloned()
        .collect()
}

// ─── Demux Worker ───────────────────────────────────────────────────────────

struct DemuxContext {
    shared: Arc<Shared>,
    registry: Arc<Mutex<Registry>>,
    format: Arc<dyn ContainerFormat>,
    decoders: Arc<dyn DecoderFactory>,
    sink: Arc<dyn PlaybackSink>,
    policy: QueuePolicy,
    probe_timeout: Duration,
}

fn demux_loop(ctx: DemuxContext, reader: RelayReader) {
    let shared = &ctx.shared;
    while !shared.data_arrived.load(Ordering::Acquire) {
        if !shared.is_running() {
            return;
        }
        thread::sleep(DEMUX_IDLE);
    }

    let mut demuxer = ctx.format.open_demuxer(reader);
    debug!(format = ctx.format.name(), "demuxer opened");
    let Some(streams) = probe(&mut *demuxer, &ctx) else {
        return;
    };

    let selected = select_streams(&streams);
    if selected.is_empty() {
        error!(streams = streams.len(), "no video or audio stream in stream table");
        shared.abort(PipelineStatus::NoStreams);
        return;
    }

    let mut router = Router::default();
    let mut ready = Vec::new();
    for stream in selected {
        let decoder = match ctx.decoders.open(&stream) {
            Ok(d) => d,
            Err(e) => {
                warn!(stream = stream.index, codec = ?stream.codec, error = %e, "no decoder, stream skipped");
                continue;
            }
        };
        let queue = Arc::new(StreamQueue::new(ctx.policy));
        match spawn_decoder(&ctx, stream.clone(), queue.clone(), decoder) {
            Ok(true) => {
                router.insert(stream.index, queue);
                ready.push(stream);
            }
            Ok(false) => return,
            Err(e) => {
                error!(error = %e, "failed to spawn decode worker");
                shared.abort(PipelineStatus::Failed(format!("spawn failed: {}", e)));
                return;
            }
        }
    }
    if router.is_empty() {
        shared.abort(PipelineStatus::Failed("no stream could be decoded".into()));
        return;
    }

    info!(streams = ready.len(), "receive pipeline ready");
    shared.set_status(PipelineStatus::Ready(ready));

    while shared.is_running() {
        match demuxer.read_next_unit() {
            Ok(unit) => {
                shared.stats.units_demuxed.inc();
                router.route(unit, &shared.running, &shared.stats);
            }
            Err(DemuxError::Again) => thread::sleep(DEMUX_IDLE),
            Err(DemuxError::Eof) => {
                debug!("relay input ended");
                break;
            }
            Err(e) => {
                shared.stats.demux_errors.inc();
                warn!(error = %e, "demux read failed");
                thread::sleep(DEMUX_IDLE);
            }
        }
    }
    debug!("demux worker exiting");
}

fn probe(demuxer: &mut dyn Demuxer, ctx: &DemuxContext) -> Option<Vec<StreamDescriptor>> {
    let shared = &ctx.shared;
    let deadline = Instant::now() + ctx.probe_timeout;
    while shared.is_running() {
        match demuxer.probe_streams() {
            Ok(streams) => return Some(streams),
            Err(DemuxError::Eof) => {
                shared.abort(PipelineStatus::Failed(
                    "input ended before a stream table".into(),
                ));
                return None;
            }
            Err(DemuxError::Again) => {}
            Err(e) => {
                shared.stats.demux_errors.inc();
                warn!(error = %e, "probe read failed");
            }
        }
        if Instant::now() >= deadline {
            error!(timeout = ?ctx.probe_timeout, "no stream table received");
            shared.abort(PipelineStatus::Failed(format!(
                "no stream table within {:?}",
                ctx.probe_timeout
            )));
            return None;
        }
        thread::sleep(DEMUX_IDLE);
    }
    None
}

/// Returns `Ok(false)` if the pipeline is already stopping.
fn spawn_decoder(
    ctx: &DemuxContext,
    stream: StreamDescriptor,
    queue: Arc<StreamQueue>,
    decoder: Box<dyn Decoder>,
) -> std::io::Result<bool> {
    let mut registry = lock_registry(&ctx.registry);
    if registry.closed || !ctx.shared.is_running() {
        return Ok(false);
    }
    let name = match stream.kind() {
        MediaKind::Video => "mxs-dec-video".to_string(),
        MediaKind::Audio => format!("mxs-dec-audio-{}", stream.index),
    };
    let index = stream.index;
    let kind = stream.kind();
    let shared = ctx.shared.clone();
    let sink = ctx.sink.clone();
    let worker_queue = queue.clone();
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || decode_loop(shared, stream, worker_queue, decoder, sink))?;
    match kind {
        MediaKind::Video => registry.video = Some(handle),
        MediaKind::Audio => registry.audio.push(handle),
    }
    registry.queues.push((index, queue));
    Ok(true)
}

// ─── Decode Worker ──────────────────────────────────────────────────────────

fn decode_loop(
    shared: Arc<Shared>,
    stream: StreamDescriptor,
    queue: Arc<StreamQueue>,
    mut decoder: Box<dyn Decoder>,
    sink: Arc<dyn PlaybackSink>,
) -> Box<dyn Decoder> {
    debug!(stream = stream.index, codec = ?stream.codec, "decode worker started");
    let mut batch = VecDeque::new();
    while shared.is_running() {
        if queue.swap_into(&mut batch, QUEUE_WAIT) == 0 {
            continue;
        }
        while let Some(unit) = batch.pop_front() {
            if !shared.is_running() {
                break;
            }
            if let Err(e) = decode_unit(&mut *decoder, &unit, &stream, &*sink, &shared.stats) {
                shared.stats.decode_errors.inc();
                shared.stats.units_abandoned.add(batch.len() as u64);
                warn!(
                    stream = stream.index,
                    pts = unit.pts,
                    abandoned = batch.len(),
                    error = %e,
                    "decode failed, abandoning batch"
                );
                break;
            }
        }
        batch.clear();
    }
    debug!(stream = stream.index, "decode worker exiting");
    decoder
}

fn decode_unit(
    decoder: &mut dyn Decoder,
    unit: &EncodedUnit,
    stream: &StreamDescriptor,
    sink: &dyn PlaybackSink,
    stats: &PipelineStats,
) -> Result<(), DecodeError> {
    decoder.send_unit(unit)?;
    loop {
        match decoder.receive_frame()? {
            DecodeStatus::NeedMoreInput => return Ok(()),
            DecodeStatus::Frame(DecodedFrame::Video(frame)) => {
                sink.deliver_video(to_sink_video(frame, stream.time_base));
                stats.video_frames.inc();
            }
            DecodeStatus::Frame(DecodedFrame::Audio(frame)) => {
                sink.deliver_audio(to_sink_audio(frame, stream.time_base));
                stats.audio_frames.inc();
            }
        }
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// Collaborators the pipeline decodes and delivers with.
#[derive(Clone)]
pub struct PipelineParts {
    pub format: Arc<dyn ContainerFormat>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub sink: Arc<dyn PlaybackSink>,
}

impl PipelineParts {
    /// Framed container and raw decoders delivering to `sink`.
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Self {
        Self {
            format: Arc::new(FramedFormat::default()),
            decoders: Arc::new(RawDecoders),
            sink,
        }
    }
}

pub struct ReceivePipeline {
    shared: Arc<Shared>,
    registry: Arc<Mutex<Registry>>,
    demux: Option<JoinHandle<()>>,
    receive: Option<JoinHandle<ReceiveDrain>>,
    stopped: bool,
}

impl ReceivePipeline {
    /// Start all workers; the receive worker takes ownership of `session`.
    pub fn start(
        session: Session,
        cfg: &ReceiveConfig,
        parts: PipelineParts,
    ) -> Result<Self, BridgeError> {
        let (mut pipeline, drain) = Self::start_selected(session, cfg, parts)?;
        let (timeout, backoff) = (cfg.receive_timeout, cfg.again_backoff);
        let handle = thread::Builder::new()
            .name("mxs-rcv-net".into())
            .spawn(move || receive_loop(drain, timeout, backoff));
        match handle {
            Ok(h) => {
                pipeline.receive = Some(h);
                Ok(pipeline)
            }
            Err(e) => {
                pipeline.stop();
                Err(e.into())
            }
        }
    }

    /// Start demux and decode workers only. The returned drain must be
    /// driven by the caller, normally through a selector.
    pub fn start_selected(
        session: Session,
        cfg: &ReceiveConfig,
        parts: PipelineParts,
    ) -> Result<(Self, ReceiveDrain), BridgeError> {
        let (writer, reader) = relay::open(cfg.relay, RELAY_READ_TIMEOUT)?;
        let shared = Arc::new(Shared::new());
        let registry = Arc::new(Mutex::new(Registry::default()));

        let ctx = DemuxContext {
            shared: shared.clone(),
            registry: registry.clone(),
            format: parts.format,
            decoders: parts.decoders,
            sink: parts.sink,
            policy: cfg.queue_policy,
            probe_timeout: cfg.probe_timeout,
        };
        let demux = thread::Builder::new()
            .name("mxs-rcv-demux".into())
            .spawn(move || demux_loop(ctx, reader))?;

        let drain = ReceiveDrain::new(session, writer, cfg.receive_buffer, shared.clone());
        info!(session = %drain.session.id(), relay = ?cfg.relay, "receive pipeline started");
        Ok((
            Self {
                shared,
                registry,
                demux: Some(demux),
                receive: None,
                stopped: false,
            },
            drain,
        ))
    }

    /// Block until the stream table is known and decoders are running.
    pub fn wait_ready(&self, timeout: Duration) -> Result<Vec<StreamDescriptor>, BridgeError> {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status();
        loop {
            match &*status {
                PipelineStatus::Ready(streams) => return Ok(streams.clone()),
                PipelineStatus::NoStreams => return Err(BridgeError::NoStreams),
                PipelineStatus::Failed(reason) => return Err(BridgeError::Pipeline(reason.clone())),
                PipelineStatus::Stopped => {
                    return Err(BridgeError::Pipeline("pipeline stopped".into()))
                }
                PipelineStatus::Starting => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::NotReady(timeout));
            }
            status = self
                .shared
                .status_cv
                .wait_timeout(status, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.shared.status().clone()
    }

    /// False once stopped or aborted by a worker.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        let queues = lock_registry(&self.registry)
            .queues
            .iter()
            .map(|(index, q)| QueueSnapshot {
                stream_index: *index,
                depth: q.len(),
                dropped: q.dropped(),
            })
            .collect();
        self.shared.stats.snapshot(queues)
    }

    /// Stop and join every worker. Returns the session when the receive
    /// worker owned it. Idempotent.
    pub fn stop(&mut self) -> Option<Session> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        self.shared.running.store(false, Ordering::Release);

        let (video, audio, queues) = {
            let mut registry = lock_registry(&self.registry);
            registry.closed = true;
            (
                registry.video.take(),
                std::mem::take(&mut registry.audio),
                registry.queues.clone(),
            )
        };
        for (_, queue) in &queues {
            queue.wake_all();
        }

        let mut decoders = Vec::new();
        for handle in video.into_iter().chain(audio) {
            match handle.join() {
                Ok(decoder) => decoders.push(decoder),
                Err(_) => error!("decode worker panicked"),
            }
        }
        if let Some(handle) = self.demux.take() {
            if handle.join().is_err() {
                error!("demux worker panicked");
            }
        }
        let session = match self.receive.take().map(JoinHandle::join) {
            Some(Ok(drain)) => Some(drain.into_session()),
            Some(Err(_)) => {
                error!("receive worker panicked");
                None
            }
            None => None,
        };

        for (_, queue) in &queues {
            queue.clear();
        }
        drop(decoders);

        {
            let mut status = self.shared.status();
            if matches!(*status, PipelineStatus::Starting | PipelineStatus::Ready(_)) {
                *status = PipelineStatus::Stopped;
            }
        }
        self.shared.status_cv.notify_all();
        info!("receive pipeline stopped");
        session
    }
}

impl Drop for ReceivePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecId, CodecParams, TimeBase};
    use crate::relay::{RelayMode, STOP_SENTINEL};
    use bytes::Bytes;
    use mxs_transport::{MemoryService, Role, StreamParams};
    use std::io::Read;

    fn receiving(svc: &MemoryService) -> Session {
        let mut s = Session::open(svc, StreamParams::new("https://h", "d1", "k"), Role::Receiver)
            .unwrap();
        s.wait_connected().unwrap();
        s
    }

    fn assert_sentinel_then_eof(reader: &mut RelayReader) {
        let mut buf = [0xFFu8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], STOP_SENTINEL);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    fn descriptor(index: u8, codec: CodecId) -> StreamDescriptor {
        let params = match codec.kind() {
            MediaKind::Video => CodecParams::Video {
                width: 16,
                height: 16,
            },
            MediaKind::Audio => CodecParams::Audio {
                sample_rate: 48_000,
                channels: 2,
            },
        };
        StreamDescriptor {
            index,
            codec,
            time_base: TimeBase::MPEG,
            params,
        }
    }

    fn unit(stream_index: u8, pts: i64) -> EncodedUnit {
        EncodedUnit {
            stream_index,
            data: Bytes::from_static(b"u"),
            pts,
            dts: pts,
            keyframe: false,
        }
    }

    #[test]
    fn selection_keeps_first_video_and_all_audio() {
        let streams = vec![
            descriptor(0, CodecId::H264),
            descriptor(1, CodecId::Aac),
            descriptor(2, CodecId::Hevc),
            descriptor(3, CodecId::PcmS16),
        ];
        let picked: Vec<u8> = select_streams(&streams).iter().map(|s| s.index).collect();
        assert_eq!(picked, vec![0, 1, 3]);
        assert!(select_streams(&[]).is_empty());
    }

    #[test]
    fn round_robin_routing_fills_queues_independently() {
        let stats = PipelineStats::default();
        let running = AtomicBool::new(true);
        let queues: Vec<Arc<StreamQueue>> = (0..3)
            .map(|_| Arc::new(StreamQueue::new(QueuePolicy::Unbounded)))
            .collect();
        let mut router = Router::default();
        for (i, q) in queues.iter().enumerate() {
            router.insert(i as u8, q.clone());
        }

        for n in 0..10 {
            assert!(router.route(unit((n % 3) as u8, n), &running, &stats));
        }
        assert_eq!(queues[0].len(), 4);
        assert_eq!(queues[1].len(), 3);
        assert_eq!(queues[2].len(), 3);

        let mut batch = VecDeque::new();
        queues[0].swap_into(&mut batch, Duration::ZERO);
        let pts: Vec<i64> = batch.iter().map(|u| u.pts).collect();
        assert_eq!(pts, vec![0, 3, 6, 9]);
        assert!(queues[0].is_empty());
        assert_eq!(queues[1].len(), 3);
        assert_eq!(queues[2].len(), 3);
        assert_eq!(stats.units_routed.get(), 10);
    }

    #[test]
    fn units_for_unknown_streams_are_counted() {
        let stats = PipelineStats::default();
        let router = Router::default();
        assert!(!router.route(unit(7, 0), &AtomicBool::new(true), &stats));
        assert_eq!(stats.units_unrouted.get(), 1);
    }

    #[test]
    fn receive_worker_exit_sends_sentinel() {
        let svc = MemoryService::new();
        let (writer, mut reader) = relay::open(RelayMode::Memory, Duration::from_secs(5)).unwrap();
        let shared = Arc::new(Shared::new());
        shared.running.store(false, Ordering::Release);

        let drain = ReceiveDrain::new(receiving(&svc), writer, 64, shared);
        let drain = receive_loop(drain, Duration::ZERO, Duration::ZERO);
        let started = Instant::now();
        assert_sentinel_then_eof(&mut reader);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(drain.into_session().is_connected());
    }

    #[test]
    fn aborted_drain_sends_sentinel() {
        let svc = MemoryService::new();
        let (writer, mut reader) = relay::open(RelayMode::Memory, Duration::from_secs(5)).unwrap();
        let shared = Arc::new(Shared::new());
        let mut session = receiving(&svc);
        session.close();

        let mut drain = ReceiveDrain::new(session, writer, 64, shared.clone());
        assert_eq!(drain.drain(), 0);
        assert!(!shared.is_running());
        assert!(matches!(*shared.status(), PipelineStatus::Failed(_)));
        assert_sentinel_then_eof(&mut reader);
    }

    #[test]
    fn abort_publishes_status_and_clears_running() {
        let shared = Shared::new();
        shared.abort(PipelineStatus::NoStreams);
        assert!(!shared.is_running());
        assert_eq!(*shared.status(), PipelineStatus::NoStreams);
    }
}
