//! # Bridge Statistics
//!
//! Counters updated lock-free from the worker threads, with serialisable
//! snapshots for logging and JSON export.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ─── Send Stats ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SendStats {
    /// Access units fully handed to the session.
    pub units_written: Counter,
    /// Access units lost to send failures, mux errors or shutdown.
    pub units_dropped: Counter,
    pub packets_sent: Counter,
    pub bytes_sent: Counter,
    /// Extra attempts after `Again`.
    pub again_retries: Counter,
    /// Chunks that could not be sent.
    pub send_failures: Counter,
    /// Chunks withheld because an earlier chunk of the same unit failed.
    pub chunks_discarded: Counter,
    /// Audio units that needed an ADTS header.
    pub adts_wrapped: Counter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendStatsSnapshot {
    pub units_written: u64,
    pub units_dropped: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub again_retries: u64,
    pub send_failures: u64,
    pub chunks_discarded: u64,
    pub adts_wrapped: u64,
}

impl SendStats {
    pub fn snapshot(&self) -> SendStatsSnapshot {
        SendStatsSnapshot {
            units_written: self.units_written.get(),
            units_dropped: self.units_dropped.get(),
            packets_sent: self.packets_sent.get(),
            bytes_sent: self.bytes_sent.get(),
            again_retries: self.again_retries.get(),
            send_failures: self.send_failures.get(),
            chunks_discarded: self.chunks_discarded.get(),
            adts_wrapped: self.adts_wrapped.get(),
        }
    }
}

// ─── Pipeline Stats ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub packets_received: Counter,
    pub bytes_relayed: Counter,
    pub buffer_resizes: Counter,
    pub relay_errors: Counter,
    pub units_demuxed: Counter,
    pub units_routed: Counter,
    /// Units for streams without a decode worker.
    pub units_unrouted: Counter,
    pub demux_errors: Counter,
    pub video_frames: Counter,
    pub audio_frames: Counter,
    pub decode_errors: Counter,
    /// Units discarded from a batch after a hard decode error.
    pub units_abandoned: Counter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub stream_index: u8,
    pub depth: usize,
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub packets_received: u64,
    pub bytes_relayed: u64,
    pub buffer_resizes: u64,
    pub relay_errors: u64,
    pub units_demuxed: u64,
    pub units_routed: u64,
    pub units_unrouted: u64,
    pub demux_errors: u64,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub decode_errors: u64,
    pub units_abandoned: u64,
    pub queues: Vec<QueueSnapshot>,
}

impl PipelineStats {
    pub fn snapshot(&self, queues: Vec<QueueSnapshot>) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            packets_received: self.packets_received.get(),
            bytes_relayed: self.bytes_relayed.get(),
            buffer_resizes: self.buffer_resizes.get(),
            relay_errors: self.relay_errors.get(),
            units_demuxed: self.units_demuxed.get(),
            units_routed: self.units_routed.get(),
            units_unrouted: self.units_unrouted.get(),
            demux_errors: self.demux_errors.get(),
            video_frames: self.video_frames.get(),
            audio_frames: self.audio_frames.get(),
            decode_errors: self.decode_errors.get(),
            units_abandoned: self.units_abandoned.get(),
            queues,
        }
    }
}
