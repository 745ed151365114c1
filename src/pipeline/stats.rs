//! Per-session frame accounting

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use serde::Serialize;

/// Counters bumped from the camera thread and the worker. Each side writes
/// its own fields, padded apart so they do not share a cache line.
#[derive(Default)]
pub(crate) struct SessionCounters {
    producer: CachePadded<ProducerCounters>,
    worker: CachePadded<WorkerCounters>,
}

#[derive(Default)]
struct ProducerCounters {
    received: AtomicU64,
    skipped: AtomicU64,
    throttled: AtomicU64,
    dropped_busy: AtomicU64,
    dispatched: AtomicU64,
}

#[derive(Default)]
struct WorkerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    delivered: AtomicU64,
    discarded: AtomicU64,
    detections: AtomicU64,
}

impl SessionCounters {
    pub fn received(&self) {
        self.producer.received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_received").increment(1);
    }

    pub fn skipped(&self) {
        self.producer.skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_skipped").increment(1);
    }

    pub fn throttled(&self) {
        self.producer.throttled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_throttled").increment(1);
    }

    pub fn dropped_busy(&self) {
        self.producer.dropped_busy.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped_busy").increment(1);
    }

    pub fn dispatched(&self) {
        self.producer.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self, failed: bool) {
        self.worker.processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.worker.failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_failed").increment(1);
        }
    }

    pub fn delivered(&self, detections: usize) {
        self.worker.delivered.fetch_add(1, Ordering::Relaxed);
        self.worker
            .detections
            .fetch_add(detections as u64, Ordering::Relaxed);
        metrics::counter!("detections_delivered").increment(detections as u64);
    }

    pub fn discarded(&self) {
        self.worker.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        let p = &self.producer;
        let w = &self.worker;
        SessionStats {
            frames_received: p.received.load(Ordering::Relaxed),
            frames_skipped: p.skipped.load(Ordering::Relaxed),
            frames_throttled: p.throttled.load(Ordering::Relaxed),
            frames_dropped_busy: p.dropped_busy.load(Ordering::Relaxed),
            frames_dispatched: p.dispatched.load(Ordering::Relaxed),
            frames_processed: w.processed.load(Ordering::Relaxed),
            frames_failed: w.failed.load(Ordering::Relaxed),
            batches_delivered: w.delivered.load(Ordering::Relaxed),
            batches_discarded: w.discarded.load(Ordering::Relaxed),
            detections_delivered: w.detections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Frames pushed while streaming
    pub frames_received: u64,
    pub frames_skipped: u64,
    pub frames_throttled: u64,
    /// Eligible frames dropped because an inference was in flight
    pub frames_dropped_busy: u64,
    pub frames_dispatched: u64,
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub batches_delivered: u64,
    /// Results that finished after stop or pause
    pub batches_discarded: u64,
    pub detections_delivered: u64,
}

impl SessionStats {
    /// Dispatched frames not yet accounted for by the worker.
    pub fn in_flight(&self) -> u64 {
        self.frames_dispatched.saturating_sub(self.frames_processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let c = SessionCounters::default();
        c.received();
        c.received();
        c.skipped();
        c.dispatched();
        c.processed(true);
        c.delivered(3);

        let s = c.snapshot();
        assert_eq!(s.frames_received, 2);
        assert_eq!(s.frames_skipped, 1);
        assert_eq!(s.frames_failed, 1);
        assert_eq!(s.detections_delivered, 3);
        assert_eq!(s.in_flight(), 0);
    }
}
