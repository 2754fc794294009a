//! Running and windowed throughput statistics for one capture session.
//!
//! The write path (`on_packet_captured`) is driven by the capture pump and
//! must never block; every counter is an individually atomic field. Readers
//! may snapshot from any thread at any time, racing with in-flight updates:
//! each field is internally consistent, but cross-field consistency at a
//! single instant is not guaranteed.

use crate::device::DeviceStats;
use crate::error::CaptureError;
use crossbeam::queue::SegQueue;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Sentinel for "no packet seen yet" in the inter-packet clock.
const NO_PREVIOUS_PACKET: u64 = u64::MAX;

/// Per-session statistics aggregator. A fresh instance is created on every
/// session start, so construction doubles as the start-of-capture reset and
/// records the start timestamp.
pub struct CaptureMetrics {
    total_packets: AtomicU64,
    total_bytes: AtomicU64,
    inter_packet_nanos: AtomicU64,
    last_packet_tick: AtomicU64,
    window_packets: AtomicU64,
    window_bytes: AtomicU64,
    window_start_tick: AtomicU64,
    max_packets_per_second: AtomicU64,
    max_bytes_per_second: AtomicU64,
    started_at: SystemTime,
    ended_at: OnceLock<SystemTime>,
    clock: Instant,
    pending_errors: SegQueue<CaptureError>,
    collected_errors: RwLock<Vec<CaptureError>>,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self {
            total_packets: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            inter_packet_nanos: AtomicU64::new(0),
            last_packet_tick: AtomicU64::new(NO_PREVIOUS_PACKET),
            window_packets: AtomicU64::new(0),
            window_bytes: AtomicU64::new(0),
            window_start_tick: AtomicU64::new(0),
            max_packets_per_second: AtomicU64::new(0),
            max_bytes_per_second: AtomicU64::new(0),
            started_at: SystemTime::now(),
            ended_at: OnceLock::new(),
            clock: Instant::now(),
            pending_errors: SegQueue::new(),
            collected_errors: RwLock::new(Vec::new()),
        }
    }

    /// Accounts one captured frame of `length` bytes.
    ///
    /// Called from the capture pump, possibly from more than one thread.
    pub fn on_packet_captured(&self, length: u32) {
        let now = self.elapsed_nanos();

        self.total_packets.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(length as u64, Ordering::Relaxed);

        // Inter-packet clock: exchange the previous arrival tick for ours.
        let prior = self.last_packet_tick.swap(now, Ordering::AcqRel);
        if prior != NO_PREVIOUS_PACKET {
            self.inter_packet_nanos
                .fetch_add(now.saturating_sub(prior), Ordering::Relaxed);
        }

        self.window_packets.fetch_add(1, Ordering::Relaxed);
        self.window_bytes.fetch_add(length as u64, Ordering::Relaxed);

        // One-second window roll. The CAS on window_start_tick elects a
        // single owner for the roll; losers leave the counters alone.
        // Boundaries advance strictly by elapsed ticks: after an idle gap
        // the start tick jumps straight to `now`, so idle seconds neither
        // widen the next window nor produce zero-throughput samples.
        let window_start = self.window_start_tick.load(Ordering::Acquire);
        if now.saturating_sub(window_start) >= NANOS_PER_SECOND
            && self
                .window_start_tick
                .compare_exchange(window_start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let closed_packets = self.window_packets.swap(0, Ordering::AcqRel);
            let closed_bytes = self.window_bytes.swap(0, Ordering::AcqRel);
            store_max(&self.max_packets_per_second, closed_packets);
            store_max(&self.max_bytes_per_second, closed_bytes);
        }
    }

    /// Freezes the end-of-session timestamp. Later calls are ignored, so
    /// stopping twice cannot move the recorded end of the session.
    pub fn on_capture_complete(&self) {
        let _ = self.ended_at.set(SystemTime::now());
    }

    /// Appends a capture-time failure. Producers never contend with readers
    /// here; the entry lands in a lock-free queue and is folded into the
    /// reader-side list on the next `errors` call.
    pub fn record_error(&self, error: CaptureError) {
        self.pending_errors.push(error);
    }

    /// Ordered list of capture-time failures recorded so far.
    pub fn errors(&self) -> Vec<CaptureError> {
        let mut collected = self.collected_errors.write();
        while let Some(error) = self.pending_errors.pop() {
            collected.push(error);
        }
        collected.clone()
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn max_packets_per_second(&self) -> u64 {
        self.max_packets_per_second.load(Ordering::Relaxed)
    }

    pub fn max_bytes_per_second(&self) -> u64 {
        self.max_bytes_per_second.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<SystemTime> {
        self.ended_at.get().copied()
    }

    /// Wall-clock span of the session: end minus start once stopped, now
    /// minus start while running.
    pub fn duration(&self) -> Duration {
        let end = self.ended_at().unwrap_or_else(SystemTime::now);
        end.duration_since(self.started_at).unwrap_or_default()
    }

    /// Derived statistics. Reads every counter exactly once and never locks
    /// the writer path; device-level drop counters are left at zero for the
    /// session to merge in at read time.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_packets = self.total_packets();
        let total_bytes = self.total_bytes();
        let duration = self.duration();
        let secs = duration.as_secs_f64();

        let average_packets_per_second = if secs > 0.0 {
            total_packets as f64 / secs
        } else {
            0.0
        };
        let average_bytes_per_second = if secs > 0.0 {
            total_bytes as f64 / secs
        } else {
            0.0
        };
        let average_packet_size = if total_packets > 0 {
            total_bytes as f64 / total_packets as f64
        } else {
            0.0
        };
        let average_inter_packet_time = if total_packets > 1 {
            Duration::from_nanos(
                self.inter_packet_nanos.load(Ordering::Relaxed) / (total_packets - 1),
            )
        } else {
            Duration::ZERO
        };

        MetricsSnapshot {
            total_packets,
            total_bytes,
            started_at: self.started_at,
            ended_at: self.ended_at(),
            duration,
            average_packets_per_second,
            average_bytes_per_second,
            average_packet_size,
            average_inter_packet_time,
            max_packets_per_second: self.max_packets_per_second(),
            max_bytes_per_second: self.max_bytes_per_second(),
            packets_dropped: 0,
            packets_if_dropped: 0,
            errors: self.errors().len(),
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Running-maximum update under contention: read, stop if not greater,
/// otherwise compare-and-retry until the store lands or a concurrently
/// installed maximum is already at least as large.
fn store_max(slot: &AtomicU64, candidate: u64) {
    let mut current = slot.load(Ordering::Relaxed);
    while candidate > current {
        match slot.compare_exchange_weak(current, candidate, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Point-in-time view of a session's statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub duration: Duration,
    pub average_packets_per_second: f64,
    pub average_bytes_per_second: f64,
    pub average_packet_size: f64,
    pub average_inter_packet_time: Duration,
    pub max_packets_per_second: u64,
    pub max_bytes_per_second: u64,
    pub packets_dropped: u64,
    pub packets_if_dropped: u64,
    pub errors: usize,
}

impl MetricsSnapshot {
    pub fn merge_device_stats(&mut self, stats: DeviceStats) {
        self.packets_dropped = stats.dropped;
        self.packets_if_dropped = stats.if_dropped;
    }

    pub fn drop_rate(&self) -> f64 {
        if self.total_packets == 0 {
            return 0.0;
        }
        (self.packets_dropped as f64 / self.total_packets as f64) * 100.0
    }

    /// Human-readable one-block summary.
    pub fn format(&self) -> String {
        format!(
            "Captured: {} packets ({} bytes)\n\
             Dropped: {} packets ({:.2}%), {} by interface\n\
             Duration: {:.2}s\n\
             Average: {:.2} pps, {:.2} KB/s, {:.1} B/packet\n\
             Peak: {} pps, {:.2} KB/s\n\
             Errors: {}",
            self.total_packets,
            self.total_bytes,
            self.packets_dropped,
            self.drop_rate(),
            self.packets_if_dropped,
            self.duration.as_secs_f64(),
            self.average_packets_per_second,
            self.average_bytes_per_second / 1024.0,
            self.average_packet_size,
            self.max_packets_per_second,
            self.max_bytes_per_second as f64 / 1024.0,
            self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureErrorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn totals_are_exact_across_threads() {
        let metrics = Arc::new(CaptureMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let metrics = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    metrics.on_packet_captured(100);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.total_packets(), 1000);
        assert_eq!(metrics.total_bytes(), 100_000);
    }

    #[test]
    fn average_packet_size() {
        let metrics = CaptureMetrics::new();
        assert_eq!(metrics.snapshot().average_packet_size, 0.0);

        metrics.on_packet_captured(64);
        metrics.on_packet_captured(512);
        metrics.on_packet_captured(1500);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_packets, 3);
        assert_eq!(snapshot.total_bytes, 2076);
        assert_eq!(snapshot.average_packet_size, 2076.0 / 3.0);
    }

    #[test]
    fn empty_session_yields_zeroed_statistics() {
        let metrics = CaptureMetrics::new();
        metrics.on_capture_complete();

        let snapshot = metrics.snapshot();
        assert!(snapshot.ended_at.is_some());
        assert_eq!(snapshot.total_packets, 0);
        assert_eq!(snapshot.total_bytes, 0);
        assert_eq!(snapshot.average_packets_per_second, 0.0);
        assert_eq!(snapshot.average_bytes_per_second, 0.0);
        assert_eq!(snapshot.average_packet_size, 0.0);
        assert_eq!(snapshot.average_inter_packet_time, Duration::ZERO);
        assert_eq!(snapshot.max_packets_per_second, 0);
        assert!(metrics.errors().is_empty());
    }

    #[test]
    fn end_timestamp_is_frozen_once() {
        let metrics = CaptureMetrics::new();
        metrics.on_capture_complete();
        let first = metrics.ended_at().unwrap();
        thread::sleep(Duration::from_millis(5));
        metrics.on_capture_complete();
        assert_eq!(metrics.ended_at().unwrap(), first);
    }

    #[test]
    fn inter_packet_time_accumulates() {
        let metrics = CaptureMetrics::new();
        metrics.on_packet_captured(64);
        assert_eq!(metrics.snapshot().average_inter_packet_time, Duration::ZERO);

        thread::sleep(Duration::from_millis(5));
        metrics.on_packet_captured(64);
        thread::sleep(Duration::from_millis(5));
        metrics.on_packet_captured(64);

        let average = metrics.snapshot().average_inter_packet_time;
        assert!(average >= Duration::from_millis(4));
    }

    #[test]
    fn window_roll_tracks_the_maximum() {
        let metrics = CaptureMetrics::new();
        for _ in 0..5 {
            metrics.on_packet_captured(100);
        }
        assert_eq!(metrics.max_packets_per_second(), 0);

        // Crossing the one-second boundary closes the open window; the
        // crossing packet is counted into it before the roll.
        thread::sleep(Duration::from_millis(1100));
        metrics.on_packet_captured(100);
        assert_eq!(metrics.max_packets_per_second(), 6);
        assert_eq!(metrics.max_bytes_per_second(), 600);

        // A smaller second window must not lower the running maximum.
        metrics.on_packet_captured(100);
        thread::sleep(Duration::from_millis(1100));
        metrics.on_packet_captured(100);
        assert_eq!(metrics.max_packets_per_second(), 6);
        assert_eq!(metrics.max_bytes_per_second(), 600);
    }

    #[test]
    fn maximum_never_undercuts_a_completed_window() {
        let metrics = Arc::new(CaptureMetrics::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reader = {
            let metrics = Arc::clone(&metrics);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seen = 0;
                while !stop.load(Ordering::Relaxed) {
                    let current = metrics.max_packets_per_second();
                    assert!(current >= seen, "running maximum went backwards");
                    seen = current;
                    thread::sleep(Duration::from_millis(10));
                }
            })
        };

        let mut writers = Vec::new();
        for _ in 0..3 {
            let metrics = Arc::clone(&metrics);
            writers.push(thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_millis(2500);
                while Instant::now() < deadline {
                    metrics.on_packet_captured(64);
                    thread::sleep(Duration::from_micros(200));
                }
            }));
        }
        for writer in writers {
            writer.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();

        // At least one full window closed during the 2.5s run.
        assert!(metrics.max_packets_per_second() > 0);
        assert!(metrics.max_packets_per_second() <= metrics.total_packets());
    }

    #[test]
    fn store_max_keeps_the_larger_value() {
        let slot = AtomicU64::new(0);
        store_max(&slot, 10);
        assert_eq!(slot.load(Ordering::Relaxed), 10);
        store_max(&slot, 7);
        assert_eq!(slot.load(Ordering::Relaxed), 10);
        store_max(&slot, 12);
        assert_eq!(slot.load(Ordering::Relaxed), 12);
    }

    #[test]
    fn errors_accumulate_in_order_and_reads_are_stable() {
        let metrics = CaptureMetrics::new();
        metrics.record_error(CaptureError::new(CaptureErrorKind::DeviceError, "first"));
        metrics.record_error(CaptureError::new(
            CaptureErrorKind::PacketConstructionError,
            "second",
        ));

        let errors = metrics.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "first");
        assert_eq!(errors[1].message, "second");

        // A second read returns the same list, not a drained one.
        assert_eq!(metrics.errors().len(), 2);
    }

    #[test]
    fn drop_rate_guards_zero_packets() {
        let metrics = CaptureMetrics::new();
        let mut snapshot = metrics.snapshot();
        assert_eq!(snapshot.drop_rate(), 0.0);

        metrics.on_packet_captured(100);
        snapshot = metrics.snapshot();
        snapshot.merge_device_stats(DeviceStats {
            dropped: 1,
            if_dropped: 0,
        });
        assert_eq!(snapshot.drop_rate(), 100.0);
    }
}
