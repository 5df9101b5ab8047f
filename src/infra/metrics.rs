//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

#[inline]
fn saturating_decrement(atomic: &AtomicU64) {
    let _ = atomic.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total samples evaluated (monotonic)
    samples_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Sum of latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Sample processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Samples dropped because they were not newer than the last one
    stale_samples_dropped: AtomicU64,
    /// Containment misses that opened a pending excursion
    excursions_started: AtomicU64,
    /// Pending excursions that became confirmed
    excursions_confirmed: AtomicU64,
    /// Pending excursions cancelled by an early return
    excursions_cancelled: AtomicU64,
    /// Confirmed excursions that ended with a return
    returns_total: AtomicU64,
    /// Sessions forced on-route because no geometry was available
    fail_open_resets: AtomicU64,
    /// Status notifications handed to the notifier
    notifications_sent: AtomicU64,
    /// Status notifications the notifier rejected
    notifications_failed: AtomicU64,
    /// Buffers persisted with complete status
    buffers_built: AtomicU64,
    /// Buffers that could not be built or stored
    buffers_failed: AtomicU64,
    /// Alarm cues emitted
    alarm_cues: AtomicU64,
    /// Directional cues emitted
    directional_cues: AtomicU64,
    /// Ingress messages dropped due to channel full or bad payload
    ingress_dropped: AtomicU64,
    /// Session inputs dropped due to a full session queue
    session_inputs_dropped: AtomicU64,
    /// Sessions currently alive (gauge)
    active_sessions: AtomicU64,
    /// Sessions currently confirmed off-route (gauge)
    off_route_sessions: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            stale_samples_dropped: AtomicU64::new(0),
            excursions_started: AtomicU64::new(0),
            excursions_confirmed: AtomicU64::new(0),
            excursions_cancelled: AtomicU64::new(0),
            returns_total: AtomicU64::new(0),
            fail_open_resets: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            buffers_built: AtomicU64::new(0),
            buffers_failed: AtomicU64::new(0),
            alarm_cues: AtomicU64::new(0),
            directional_cues: AtomicU64::new(0),
            ingress_dropped: AtomicU64::new(0),
            session_inputs_dropped: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            off_route_sessions: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a sample was evaluated with given latency (lock-free)
    #[inline]
    pub fn record_sample_processed(&self, latency_us: u64) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_stale_sample(&self) {
        self.stale_samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_excursion_started(&self) {
        self.excursions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_excursion_confirmed(&self) {
        self.excursions_confirmed.fetch_add(1, Ordering::Relaxed);
        self.off_route_sessions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_excursion_cancelled(&self) {
        self.excursions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// A confirmed excursion ended, by return or fail-open
    #[inline]
    pub fn record_return(&self) {
        self.returns_total.fetch_add(1, Ordering::Relaxed);
        saturating_decrement(&self.off_route_sessions);
    }

    #[inline]
    pub fn record_fail_open(&self) {
        self.fail_open_resets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_buffer_built(&self) {
        self.buffers_built.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_buffer_failed(&self) {
        self.buffers_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cue(&self, alarm: bool) {
        if alarm {
            self.alarm_cues.fetch_add(1, Ordering::Relaxed);
        } else {
            self.directional_cues.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an ingress message dropped due to channel full or bad payload (lock-free)
    #[inline]
    pub fn record_ingress_dropped(&self) {
        self.ingress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session input dropped due to a full session queue (lock-free)
    #[inline]
    pub fn record_session_input_dropped(&self) {
        self.session_inputs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the number of live sessions (called by the tracker)
    #[inline]
    pub fn set_active_sessions(&self, count: u64) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stale_samples_dropped(&self) -> u64 {
        self.stale_samples_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn excursions_confirmed(&self) -> u64 {
        self.excursions_confirmed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn buffers_built(&self) -> u64 {
        self.buffers_built.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn buffers_failed(&self) -> u64 {
        self.buffers_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn off_route_sessions(&self) -> u64 {
        self.off_route_sessions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn session_inputs_dropped(&self) -> u64 {
        self.session_inputs_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let samples_count = self.samples_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let samples_per_sec = if elapsed.as_secs_f64() > 0.0 {
            samples_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if samples_count > 0 { latency_sum / samples_count } else { 0 };

        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            samples_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            stale_samples_dropped: self.stale_samples_dropped.load(Ordering::Relaxed),
            excursions_started: self.excursions_started.load(Ordering::Relaxed),
            excursions_confirmed: self.excursions_confirmed.load(Ordering::Relaxed),
            excursions_cancelled: self.excursions_cancelled.load(Ordering::Relaxed),
            returns_total: self.returns_total.load(Ordering::Relaxed),
            fail_open_resets: self.fail_open_resets.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            buffers_built: self.buffers_built.load(Ordering::Relaxed),
            buffers_failed: self.buffers_failed.load(Ordering::Relaxed),
            alarm_cues: self.alarm_cues.load(Ordering::Relaxed),
            directional_cues: self.directional_cues.load(Ordering::Relaxed),
            ingress_dropped: self.ingress_dropped.load(Ordering::Relaxed),
            session_inputs_dropped: self.session_inputs_dropped.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            off_route_sessions: self.off_route_sessions.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Sample processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub stale_samples_dropped: u64,
    pub excursions_started: u64,
    pub excursions_confirmed: u64,
    pub excursions_cancelled: u64,
    pub returns_total: u64,
    pub fail_open_resets: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub buffers_built: u64,
    pub buffers_failed: u64,
    pub alarm_cues: u64,
    pub directional_cues: u64,
    pub ingress_dropped: u64,
    pub session_inputs_dropped: u64,
    pub active_sessions: u64,
    pub off_route_sessions: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            active_sessions = %self.active_sessions,
            off_route = %self.off_route_sessions,
            confirmed = %self.excursions_confirmed,
            cancelled = %self.excursions_cancelled,
            returns = %self.returns_total,
            notify_failed = %self.notifications_failed,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sample() {
        let metrics = Metrics::new();

        metrics.record_sample_processed(100);
        assert_eq!(metrics.samples_total(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_sample_processed(200);
        assert_eq!(metrics.samples_total(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_sample_processed(100);
        metrics.record_sample_processed(200);
        metrics.record_sample_processed(300);
        metrics.record_excursion_confirmed();
        metrics.set_active_sessions(4);

        let summary = metrics.report();

        assert_eq!(summary.samples_total, 3);
        assert_eq!(summary.avg_process_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_process_latency_us, 300);
        assert_eq!(summary.excursions_confirmed, 1);
        assert_eq!(summary.off_route_sessions, 1);
        assert_eq!(summary.active_sessions, 4);

        // Periodic counters should be reset
        assert_eq!(metrics.samples_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_off_route_gauge_never_underflows() {
        let metrics = Metrics::new();
        metrics.record_return();
        assert_eq!(metrics.off_route_sessions(), 0);

        metrics.record_excursion_confirmed();
        metrics.record_return();
        metrics.record_return();
        assert_eq!(metrics.off_route_sessions(), 0);
        assert_eq!(metrics.report().returns_total, 3);
    }

    #[test]
    fn test_notification_outcomes() {
        let metrics = Metrics::new();
        metrics.record_notification(true);
        metrics.record_notification(false);
        metrics.record_notification(false);
        let summary = metrics.report();
        assert_eq!(summary.notifications_sent, 1);
        assert_eq!(summary.notifications_failed, 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        // Spawn 10 threads, each recording 1000 samples
        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_sample_processed(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.samples_total(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // Record 100 samples, all at 150µs (bucket 1, ≤200)
        for _ in 0..100 {
            metrics.record_sample_processed(150);
        }

        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
