//! Lock-free request metrics and periodic reporting
//!
//! Counters and histogram buckets are monotonic so they can be scraped by
//! Prometheus. The periodic log report uses separate since-report counters
//! that are swapped to zero on each report.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must never drive request handling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Measurement latency bucket boundaries (milliseconds)
/// Buckets: ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, ≤10000, ≤30000, >30000
const BUCKET_BOUNDS: [u64; 10] = [25, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000];
const NUM_BUCKETS: usize = 11;

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
        [25, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000, 60000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// How a measure request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 200 with measurements
    Success,
    /// 4xx before any processing (bad upload)
    Rejected,
    /// 422, image could not be measured
    Unprocessable,
    /// 500, unexpected processing failure
    Failed,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// All HTTP requests, any route (monotonic)
    http_requests_total: AtomicU64,
    /// Measure requests by outcome (monotonic)
    measure_success_total: AtomicU64,
    measure_rejected_total: AtomicU64,
    measure_unprocessable_total: AtomicU64,
    measure_failed_total: AtomicU64,
    /// Measure latency histogram (monotonic)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    latency_sum_ms: AtomicU64,
    /// Measure requests since last report (reset on report)
    measures_since_report: AtomicU64,
    /// Max measure latency since last report (reset on report)
    latency_max_ms: AtomicU64,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            measure_success_total: AtomicU64::new(0),
            measure_rejected_total: AtomicU64::new(0),
            measure_unprocessable_total: AtomicU64::new(0),
            measure_failed_total: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_ms: AtomicU64::new(0),
            measures_since_report: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record any incoming HTTP request (lock-free)
    #[inline]
    pub fn record_http_request(&self) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a measure request (lock-free)
    #[inline]
    pub fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Success => &self.measure_success_total,
            Outcome::Rejected => &self.measure_rejected_total,
            Outcome::Unprocessable => &self.measure_unprocessable_total,
            Outcome::Failed => &self.measure_failed_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.measures_since_report.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent decoding and measuring one image (lock-free)
    #[inline]
    pub fn record_measure_latency(&self, latency_ms: u64) {
        self.latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_ms, latency_ms);
    }

    /// Consistent-enough view of the monotonic counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency_buckets = load_buckets(&self.latency_buckets);
        MetricsSnapshot {
            http_requests_total: self.http_requests_total.load(Ordering::Relaxed),
            measure_success_total: self.measure_success_total.load(Ordering::Relaxed),
            measure_rejected_total: self.measure_rejected_total.load(Ordering::Relaxed),
            measure_unprocessable_total: self.measure_unprocessable_total.load(Ordering::Relaxed),
            measure_failed_total: self.measure_failed_total.load(Ordering::Relaxed),
            latency_sum_ms: self.latency_sum_ms.load(Ordering::Relaxed),
            latency_p50_ms: percentile_from_buckets(&latency_buckets, 0.50),
            latency_p99_ms: percentile_from_buckets(&latency_buckets, 0.99),
            latency_buckets,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Snapshot plus since-report counters, which are reset
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            snapshot: self.snapshot(),
            measures_since_report: self.measures_since_report.swap(0, Ordering::Relaxed),
            latency_max_ms: self.latency_max_ms.swap(0, Ordering::Relaxed),
        }
    }
}

/// Exposed for the Prometheus endpoint
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub http_requests_total: u64,
    pub measure_success_total: u64,
    pub measure_rejected_total: u64,
    pub measure_unprocessable_total: u64,
    pub measure_failed_total: u64,
    pub latency_buckets: [u64; NUM_BUCKETS],
    pub latency_sum_ms: u64,
    pub latency_p50_ms: u64,
    pub latency_p99_ms: u64,
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    pub fn measure_total(&self) -> u64 {
        self.measure_success_total
            + self.measure_rejected_total
            + self.measure_unprocessable_total
            + self.measure_failed_total
    }
}

#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub snapshot: MetricsSnapshot,
    pub measures_since_report: u64,
    pub latency_max_ms: u64,
}

impl MetricsReport {
    pub fn log(&self) {
        let s = &self.snapshot;
        info!(
            http_requests = %s.http_requests_total,
            measures = %self.measures_since_report,
            success_total = %s.measure_success_total,
            rejected_total = %s.measure_rejected_total,
            unprocessable_total = %s.measure_unprocessable_total,
            failed_total = %s.measure_failed_total,
            p50_ms = %s.latency_p50_ms,
            p99_ms = %s.latency_p99_ms,
            max_ms = %self.latency_max_ms,
            "metrics"
        );
    }
}
