//! Per-event latency tracking
//!
//! A bounded reservoir of nanosecond samples plus running aggregates. The
//! dispatch loop owns one tracker, so recording is plain `&mut` with no
//! synchronization cost; percentiles sort a copy on demand.

use serde::Serialize;

/// EMA smoothing factor
const EMA_ALPHA: f64 = 0.1;

/// Derived latency statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Samples recorded
    pub count: u64,
    /// Fastest event, nanoseconds
    pub min_ns: u64,
    /// Slowest event, nanoseconds
    pub max_ns: u64,
    /// Arithmetic mean, nanoseconds
    pub mean_ns: f64,
    /// Exponential moving average, nanoseconds
    pub ema_ns: f64,
    /// Median over the retained reservoir
    pub p50_ns: u64,
    /// 95th percentile over the retained reservoir
    pub p95_ns: u64,
    /// 99th percentile over the retained reservoir
    pub p99_ns: u64,
    /// Events above the spike threshold
    pub spikes: u64,
}

/// Bounded-reservoir latency tracker with spike detection
#[derive(Debug)]
pub struct LatencyTracker {
    samples: Vec<u64>,
    capacity: usize,
    next: usize,
    count: u64,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
    ema_ns: f64,
    spike_threshold_ns: u64,
    spikes: u64,
}

impl LatencyTracker {
    /// Tracker retaining up to `capacity` samples; events slower than
    /// `spike_threshold_ns` are logged and counted
    #[must_use]
    pub fn new(capacity: usize, spike_threshold_ns: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            count: 0,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            ema_ns: 0.0,
            spike_threshold_ns,
            spikes: 0,
        }
    }

    /// Record one event duration
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, elapsed_ns: u64) {
        self.count += 1;
        self.total_ns += elapsed_ns;
        self.min_ns = self.min_ns.min(elapsed_ns);
        self.max_ns = self.max_ns.max(elapsed_ns);
        self.ema_ns = if self.count == 1 {
            elapsed_ns as f64
        } else {
            EMA_ALPHA * elapsed_ns as f64 + (1.0 - EMA_ALPHA) * self.ema_ns
        };

        if self.samples.len() < self.capacity {
            self.samples.push(elapsed_ns);
        } else {
            self.samples[self.next] = elapsed_ns;
            self.next = (self.next + 1) % self.capacity;
        }

        if self.spike_threshold_ns > 0 && elapsed_ns > self.spike_threshold_ns {
            self.spikes += 1;
            tracing::warn!(
                elapsed_us = elapsed_ns / 1_000,
                threshold_us = self.spike_threshold_ns / 1_000,
                "event processing latency spike"
            );
        }
    }

    /// Samples recorded so far
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Derive statistics from the current state
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> LatencyStats {
        if self.count == 0 {
            return LatencyStats::default();
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        LatencyStats {
            count: self.count,
            min_ns: self.min_ns,
            max_ns: self.max_ns,
            mean_ns: self.total_ns as f64 / self.count as f64,
            ema_ns: self.ema_ns,
            p50_ns: percentile(&sorted, 0.50),
            p95_ns: percentile(&sorted, 0.95),
            p99_ns: percentile(&sorted, 0.99),
            spikes: self.spikes,
        }
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_reports_zeros() {
        let tracker = LatencyTracker::new(100, 0);
        assert_eq!(tracker.stats(), LatencyStats::default());
    }

    #[test]
    fn test_aggregates_and_percentiles() {
        let mut tracker = LatencyTracker::new(1000, 0);
        for ns in 1..=100u64 {
            tracker.record(ns * 100);
        }
        let stats = tracker.stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min_ns, 100);
        assert_eq!(stats.max_ns, 10_000);
        assert!((stats.mean_ns - 5_050.0).abs() < 1e-9);
        // Nearest-rank over indices 0..=99: 49.5 rounds up to 50.
        assert_eq!(stats.p50_ns, 5_100);
        assert_eq!(stats.p95_ns, 9_500);
        assert_eq!(stats.p99_ns, 9_900);
    }

    #[test]
    fn test_reservoir_wraps_without_losing_aggregates() {
        let mut tracker = LatencyTracker::new(10, 0);
        for ns in 1..=100u64 {
            tracker.record(ns);
        }
        let stats = tracker.stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.max_ns, 100, "max survives reservoir wrap");
        // Only the last 10 samples remain for percentiles.
        assert!(stats.p50_ns >= 91);
    }

    #[test]
    fn test_spike_detection_counts() {
        let mut tracker = LatencyTracker::new(10, 1_000);
        tracker.record(500);
        tracker.record(1_500);
        tracker.record(2_000);
        assert_eq!(tracker.stats().spikes, 2);
    }
}
