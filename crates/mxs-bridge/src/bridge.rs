//! # Bridge Controller
//!
//! Start/stop ordering for both directions.
//!
//! Send: open session, wait for the connect outcome, write the stream table,
//! then accept access units. Stop refuses further units, writes the trailer
//! and closes the session.
//!
//! Receive: open session, wait for the connect outcome, start the pipeline
//! (or register its drain with a selector). Stop joins the workers before
//! the session is closed.
//!
//! A refused connection aborts the start before any worker exists.

use std::sync::Arc;
use std::time::Duration;

use mxs_transport::{Role, Selector, Service, Session, SessionId};
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::container::{ContainerFormat, FramedFormat};
use crate::error::BridgeError;
use crate::media::{AccessUnit, StreamDescriptor};
use crate::packetizer::{
    stream_layout, ChunkWriter, DropObserver, DropReason, DroppedUnit, Packetizer, TrackSpec,
};
use crate::pipeline::{PipelineParts, PipelineStatus, ReceiveDrain, ReceivePipeline};
use crate::stats::{PipelineStatsSnapshot, SendStats, SendStatsSnapshot};

/// Open a session and wait for the server's answer. On refusal the session
/// is closed before the error is returned.
pub fn open_connected(
    service: &dyn Service,
    cfg: &BridgeConfig,
    role: Role,
) -> Result<Session, BridgeError> {
    let mut session = Session::open(service, cfg.stream.clone(), role)?;
    if let Err(failure) = session.wait_connected() {
        error!(
            session = %session.id(),
            role = ?role,
            stream = %cfg.stream.stream_key,
            code = %failure.code,
            detail = %failure.detail,
            failed_devices = failure.failed_devices,
            "server connect failed"
        );
        session.close();
        return Err(failure.into());
    }
    Ok(session)
}

// ─── Send ───────────────────────────────────────────────────────────────────

pub struct SendBridge {
    packetizer: Option<Packetizer>,
    session_id: SessionId,
    stats: Arc<SendStats>,
}

impl SendBridge {
    /// Start with the built-in framed container.
    pub fn start(
        service: &dyn Service,
        cfg: &BridgeConfig,
        tracks: &[TrackSpec],
    ) -> Result<Self, BridgeError> {
        let format = FramedFormat {
            header_interval: cfg.send.header_interval,
        };
        Self::start_with_format(service, cfg, tracks, &format)
    }

    pub fn start_with_format(
        service: &dyn Service,
        cfg: &BridgeConfig,
        tracks: &[TrackSpec],
        format: &dyn ContainerFormat,
    ) -> Result<Self, BridgeError> {
        if tracks.is_empty() {
            return Err(BridgeError::NoStreams);
        }
        let session = open_connected(service, cfg, Role::Sender)?;
        let session_id = session.id();
        let stats = Arc::new(SendStats::default());
        let streams = stream_layout(tracks, cfg.send.time_base);

        let writer = ChunkWriter::new(session, &cfg.send, stats.clone());
        let muxer = format.open_muxer(writer, streams.clone())?;
        let mut packetizer = Packetizer::new(muxer, tracks, &streams, &cfg.send, stats.clone());
        packetizer.start()?;

        info!(
            session = %session_id,
            format = format.name(),
            streams = streams.len(),
            max_packet = cfg.send.max_packet_size,
            "send bridge started"
        );
        Ok(Self {
            packetizer: Some(packetizer),
            session_id,
            stats,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.packetizer.is_some()
    }

    pub fn set_drop_observer(&mut self, observer: DropObserver) {
        if let Some(p) = self.packetizer.as_mut() {
            p.set_drop_observer(observer);
        }
    }

    /// Send one access unit. Units pushed after [`stop`](Self::stop) are
    /// refused with [`DropReason::Stopping`].
    pub fn push(&mut self, au: AccessUnit) -> Result<(), DroppedUnit> {
        match self.packetizer.as_mut() {
            Some(p) => p.write_access_unit(au),
            None => {
                self.stats.units_dropped.inc();
                Err(DroppedUnit {
                    track: au.track,
                    pts: au.pts,
                    reason: DropReason::Stopping,
                })
            }
        }
    }

    pub fn stats(&self) -> SendStatsSnapshot {
        self.stats.snapshot()
    }

    /// Write the trailer and close the session. Idempotent.
    pub fn stop(&mut self) -> SendStatsSnapshot {
        if let Some(packetizer) = self.packetizer.take() {
            let mut session = packetizer.finish();
            session.close();
            let snap = self.stats.snapshot();
            info!(
                session = %self.session_id,
                units = snap.units_written,
                dropped = snap.units_dropped,
                packets = snap.packets_sent,
                "send bridge stopped"
            );
        }
        self.stats.snapshot()
    }
}

impl Drop for SendBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Receive ────────────────────────────────────────────────────────────────

pub struct ReceiveBridge {
    pipeline: ReceivePipeline,
    session_id: SessionId,
    /// The drain lives in a caller-owned selector.
    selected: bool,
    stopped: bool,
}

impl ReceiveBridge {
    /// Start with a dedicated receive worker.
    pub fn start(
        service: &dyn Service,
        cfg: &BridgeConfig,
        parts: PipelineParts,
    ) -> Result<Self, BridgeError> {
        let session = open_connected(service, cfg, Role::Receiver)?;
        let session_id = session.id();
        let pipeline = ReceivePipeline::start(session, &cfg.receive, parts)?;
        Ok(Self {
            pipeline,
            session_id,
            selected: false,
            stopped: false,
        })
    }

    /// Start without a receive worker; the session is registered with
    /// `selector` and received from inside its poll callback.
    pub fn start_on_selector(
        service: &dyn Service,
        cfg: &BridgeConfig,
        parts: PipelineParts,
        selector: &mut Selector<ReceiveDrain>,
    ) -> Result<Self, BridgeError> {
        let session = open_connected(service, cfg, Role::Receiver)?;
        let (pipeline, drain) = ReceivePipeline::start_selected(session, &cfg.receive, parts)?;
        let session_id = selector.add_session(drain)?;
        Ok(Self {
            pipeline,
            session_id,
            selected: true,
            stopped: false,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn wait_ready(&self, timeout: Duration) -> Result<Vec<StreamDescriptor>, BridgeError> {
        self.pipeline.wait_ready(timeout)
    }

    pub fn status(&self) -> PipelineStatus {
        self.pipeline.status()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped && self.pipeline.is_running()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.pipeline.stats()
    }

    /// Join the workers, then close the session. In selector mode the
    /// session stays registered; use [`stop_on_selector`](Self::stop_on_selector).
    pub fn stop(&mut self) -> PipelineStatsSnapshot {
        if !self.stopped {
            self.stopped = true;
            if let Some(mut session) = self.pipeline.stop() {
                session.close();
            } else if self.selected {
                warn!(session = %self.session_id, "stopped without its selector, session left registered");
            }
            info!(session = %self.session_id, "receive bridge stopped");
        }
        self.pipeline.stats()
    }

    /// Selector-mode stop: join the workers, then unregister and close the
    /// session.
    pub fn stop_on_selector(&mut self, selector: &mut Selector<ReceiveDrain>) -> PipelineStatsSnapshot {
        if !self.stopped {
            self.stopped = true;
            self.pipeline.stop();
            if let Some(drain) = selector.remove_session(self.session_id) {
                drain.into_session().close();
            }
            info!(session = %self.session_id, "receive bridge stopped");
        } else if let Some(drain) = selector.remove_session(self.session_id) {
            drain.into_session().close();
        }
        self.pipeline.stats()
    }
}

impl Drop for ReceiveBridge {
    fn drop(&mut self) {
        self.stop();
    }
}
