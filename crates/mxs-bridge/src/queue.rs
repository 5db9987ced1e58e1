//! # Elementary-Stream Queues
//!
//! One FIFO per decoded stream, filled by the demux worker and emptied by
//! that stream's decode worker. The consumer never pops under the lock: it
//! swaps the whole pending list with its own (empty) private list, so the
//! producer is held off for O(1) regardless of backlog.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::media::EncodedUnit;

/// Wait slice for a blocked producer; it re-checks `running` between slices.
const BLOCK_SLICE: Duration = Duration::from_millis(20);

/// What happens when a queue reaches its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    Unbounded,
    /// Evict the oldest unit to make room.
    DropOldest(usize),
    /// Stall the producer until the consumer swaps.
    BlockProducer(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest unit.
    Evicted,
    /// Producer gave up because the pipeline stopped.
    Abandoned,
}

pub struct StreamQueue {
    units: Mutex<VecDeque<EncodedUnit>>,
    not_empty: Condvar,
    not_full: Condvar,
    policy: QueuePolicy,
    dropped: AtomicU64,
}

impl StreamQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            units: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EncodedUnit>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, unit: EncodedUnit, running: &AtomicBool) -> PushOutcome {
        let mut units = self.lock();
        let mut outcome = PushOutcome::Queued;
        match self.policy {
            QueuePolicy::Unbounded => {}
            QueuePolicy::DropOldest(cap) => {
                while units.len() >= cap.max(1) {
                    units.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    outcome = PushOutcome::Evicted;
                }
            }
            QueuePolicy::BlockProducer(cap) => {
                while units.len() >= cap.max(1) {
                    if !running.load(Ordering::Relaxed) {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return PushOutcome::Abandoned;
                    }
                    units = self
                        .not_full
                        .wait_timeout(units, BLOCK_SLICE)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
            }
        }
        units.push_back(unit);
        drop(units);
        self.not_empty.notify_one();
        outcome
    }

    /// Move everything pending into `out`, which must be empty. Waits up to
    /// `timeout` for the first unit. Returns the number of units taken.
    pub fn swap_into(&self, out: &mut VecDeque<EncodedUnit>, timeout: Duration) -> usize {
        debug_assert!(out.is_empty());
        let mut units = self.lock();
        if units.is_empty() && !timeout.is_zero() {
            units = self
                .not_empty
                .wait_timeout(units, timeout)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        std::mem::swap(&mut *units, out);
        drop(units);
        self.not_full.notify_all();
        out.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.not_full.notify_all();
    }

    /// Wake any blocked producer or consumer so it re-checks its running flag.
    pub fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Units discarded by the bound policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn unit(pts: i64) -> EncodedUnit {
        EncodedUnit {
            stream_index: 0,
            data: Bytes::from_static(b"u"),
            pts,
            dts: pts,
            keyframe: false,
        }
    }

    #[test]
    fn swap_takes_everything_in_order() {
        let q = StreamQueue::new(QueuePolicy::Unbounded);
        let running = AtomicBool::new(true);
        for i in 0..5 {
            assert_eq!(q.push(unit(i), &running), PushOutcome::Queued);
        }
        let mut private = VecDeque::new();
        assert_eq!(q.swap_into(&mut private, Duration::ZERO), 5);
        assert!(q.is_empty());
        let pts: Vec<i64> = private.iter().map(|u| u.pts).collect();
        assert_eq!(pts, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn swap_on_empty_times_out() {
        let q = StreamQueue::new(QueuePolicy::Unbounded);
        let mut private = VecDeque::new();
        let started = Instant::now();
        assert_eq!(q.swap_into(&mut private, Duration::from_millis(30)), 0);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn swap_wakes_on_push() {
        let q = Arc::new(StreamQueue::new(QueuePolicy::Unbounded));
        let producer = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(unit(1), &AtomicBool::new(true));
        });
        let mut private = VecDeque::new();
        let mut taken = 0;
        let deadline = Instant::now() + Duration::from_secs(2);
        while taken == 0 && Instant::now() < deadline {
            taken = q.swap_into(&mut private, Duration::from_millis(500));
        }
        handle.join().unwrap();
        assert_eq!(taken, 1);
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let q = StreamQueue::new(QueuePolicy::DropOldest(3));
        let running = AtomicBool::new(true);
        for i in 0..3 {
            q.push(unit(i), &running);
        }
        assert_eq!(q.push(unit(3), &running), PushOutcome::Evicted);
        assert_eq!(q.dropped(), 1);
        let mut private = VecDeque::new();
        q.swap_into(&mut private, Duration::ZERO);
        assert_eq!(private.front().map(|u| u.pts), Some(1));
        assert_eq!(private.len(), 3);
    }

    #[test]
    fn blocked_producer_resumes_after_swap() {
        let q = Arc::new(StreamQueue::new(QueuePolicy::BlockProducer(1)));
        let running = Arc::new(AtomicBool::new(true));
        q.push(unit(0), &running);

        let (pq, pr) = (q.clone(), running.clone());
        let producer = thread::spawn(move || pq.push(unit(1), &pr));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1);

        let mut private = VecDeque::new();
        q.swap_into(&mut private, Duration::ZERO);
        assert_eq!(producer.join().unwrap(), PushOutcome::Queued);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn blocked_producer_abandons_on_stop() {
        let q = Arc::new(StreamQueue::new(QueuePolicy::BlockProducer(1)));
        let running = Arc::new(AtomicBool::new(true));
        q.push(unit(0), &running);

        let (pq, pr) = (q.clone(), running.clone());
        let producer = thread::spawn(move || pq.push(unit(1), &pr));
        thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::Relaxed);
        q.wake_all();
        assert_eq!(producer.join().unwrap(), PushOutcome::Abandoned);
        assert_eq!(q.dropped(), 1);
    }

    #[test]
    fn clear_empties() {
        let q = StreamQueue::new(QueuePolicy::Unbounded);
        q.push(unit(0), &AtomicBool::new(true));
        q.clear();
        assert!(q.is_empty());
    }
}
