//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; the periodic report is the only
//! operation that resets anything (rate and max, via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters only;
//! do not use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for pipeline latency (milliseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
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

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
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

/// Outcome of one pipeline invocation, for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    LineIdentified,
    NoLine,
    DecodeError,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Images processed (monotonic)
    images_total: AtomicU64,
    /// Images since last report (reset on report)
    images_since_report: AtomicU64,
    /// Sum of pipeline latencies in ms (monotonic)
    latency_sum_ms: AtomicU64,
    /// Max pipeline latency in ms (reset on report)
    latency_max_ms: AtomicU64,
    /// Pipeline latency histogram buckets (monotonic)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    lines_identified_total: AtomicU64,
    no_line_total: AtomicU64,
    decode_errors_total: AtomicU64,
    /// Detector backend failures or timeouts (monotonic)
    localization_failures_total: AtomicU64,
    /// OCR backend unavailable, failed or timed out (monotonic)
    recognition_unavailable_total: AtomicU64,
    arrivals_recorded_total: AtomicU64,
    /// Records refused for an unknown line (monotonic)
    arrivals_rejected_total: AtomicU64,
    arrivals_expired_total: AtomicU64,
    arrivals_confirmed_total: AtomicU64,
    /// Arrivals deleted by the retention sweep (monotonic)
    arrivals_purged_total: AtomicU64,
    /// Egress entries dropped due to channel full (monotonic)
    egress_dropped_total: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            images_total: AtomicU64::new(0),
            images_since_report: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            lines_identified_total: AtomicU64::new(0),
            no_line_total: AtomicU64::new(0),
            decode_errors_total: AtomicU64::new(0),
            localization_failures_total: AtomicU64::new(0),
            recognition_unavailable_total: AtomicU64::new(0),
            arrivals_recorded_total: AtomicU64::new(0),
            arrivals_rejected_total: AtomicU64::new(0),
            arrivals_expired_total: AtomicU64::new(0),
            arrivals_confirmed_total: AtomicU64::new(0),
            arrivals_purged_total: AtomicU64::new(0),
            egress_dropped_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one pipeline invocation with its wall-clock latency (lock-free)
    #[inline]
    pub fn record_image_processed(&self, outcome: PipelineOutcome, latency_ms: u64) {
        self.images_total.fetch_add(1, Ordering::Relaxed);
        self.images_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let bucket = bucket_index(latency_ms);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_ms, latency_ms);

        let counter = match outcome {
            PipelineOutcome::LineIdentified => &self.lines_identified_total,
            PipelineOutcome::NoLine => &self.no_line_total,
            PipelineOutcome::DecodeError => &self.decode_errors_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_localization_failure(&self) {
        self.localization_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recognition_unavailable(&self) {
        self.recognition_unavailable_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrival_recorded(&self) {
        self.arrivals_recorded_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrival_rejected(&self) {
        self.arrivals_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrivals_expired(&self, count: u64) {
        self.arrivals_expired_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrival_confirmed(&self) {
        self.arrivals_confirmed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrivals_purged(&self, count: u64) {
        self.arrivals_purged_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    /// Histogram buckets are cumulative so Prometheus sees monotonic series.
    pub fn report(&self, en_route_arrivals: usize) -> MetricsSummary {
        let images_count = self.images_since_report.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_ms.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summarize(images_count, max_latency, elapsed.as_secs_f64(), en_route_arrivals)
    }

    /// Summary without resetting anything (used by the scrape endpoint)
    pub fn snapshot(&self, en_route_arrivals: usize) -> MetricsSummary {
        let images_count = self.images_since_report.load(Ordering::Relaxed);
        let max_latency = self.latency_max_ms.load(Ordering::Relaxed);
        let elapsed = self.last_report_time.lock().elapsed();

        self.summarize(images_count, max_latency, elapsed.as_secs_f64(), en_route_arrivals)
    }

    fn summarize(
        &self,
        images_count: u64,
        max_latency: u64,
        elapsed_secs: f64,
        en_route_arrivals: usize,
    ) -> MetricsSummary {
        let images_total = self.images_total.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.load(Ordering::Relaxed);
        let lat_buckets = load_buckets(&self.latency_buckets);

        let images_per_min =
            if elapsed_secs > 0.0 { images_count as f64 * 60.0 / elapsed_secs } else { 0.0 };
        let avg_latency = if images_total > 0 { latency_sum / images_total } else { 0 };

        MetricsSummary {
            images_total,
            images_per_min,
            avg_latency_ms: avg_latency,
            max_latency_ms: max_latency,
            lat_p50_ms: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_ms: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_ms: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            latency_sum_ms: latency_sum,
            lines_identified_total: self.lines_identified_total.load(Ordering::Relaxed),
            no_line_total: self.no_line_total.load(Ordering::Relaxed),
            decode_errors_total: self.decode_errors_total.load(Ordering::Relaxed),
            localization_failures_total: self.localization_failures_total.load(Ordering::Relaxed),
            recognition_unavailable_total: self
                .recognition_unavailable_total
                .load(Ordering::Relaxed),
            arrivals_recorded_total: self.arrivals_recorded_total.load(Ordering::Relaxed),
            arrivals_rejected_total: self.arrivals_rejected_total.load(Ordering::Relaxed),
            arrivals_expired_total: self.arrivals_expired_total.load(Ordering::Relaxed),
            arrivals_confirmed_total: self.arrivals_confirmed_total.load(Ordering::Relaxed),
            arrivals_purged_total: self.arrivals_purged_total.load(Ordering::Relaxed),
            egress_dropped_total: self.egress_dropped_total.load(Ordering::Relaxed),
            en_route_arrivals,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub images_total: u64,
    pub images_per_min: f64,
    pub avg_latency_ms: u64,
    pub max_latency_ms: u64,
    pub lat_p50_ms: u64,
    pub lat_p95_ms: u64,
    pub lat_p99_ms: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub latency_sum_ms: u64,
    pub lines_identified_total: u64,
    pub no_line_total: u64,
    pub decode_errors_total: u64,
    pub localization_failures_total: u64,
    pub recognition_unavailable_total: u64,
    pub arrivals_recorded_total: u64,
    pub arrivals_rejected_total: u64,
    pub arrivals_expired_total: u64,
    pub arrivals_confirmed_total: u64,
    pub arrivals_purged_total: u64,
    pub egress_dropped_total: u64,
    pub en_route_arrivals: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            images_total = %self.images_total,
            images_per_min = %format!("{:.1}", self.images_per_min),
            avg_latency_ms = %self.avg_latency_ms,
            max_latency_ms = %self.max_latency_ms,
            lat_p50_ms = %self.lat_p50_ms,
            lat_p99_ms = %self.lat_p99_ms,
            lines_identified = %self.lines_identified_total,
            no_line = %self.no_line_total,
            decode_errors = %self.decode_errors_total,
            localization_failures = %self.localization_failures_total,
            recognition_unavailable = %self.recognition_unavailable_total,
            arrivals_recorded = %self.arrivals_recorded_total,
            arrivals_expired = %self.arrivals_expired_total,
            arrivals_en_route = %self.en_route_arrivals,
            "metrics"
        );
    }
}
