//! Prometheus text exposition for `/metrics`

use crate::infra::metrics::{
    Metrics, MetricsSnapshot, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS,
};
use std::fmt::Write;

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with service label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    service: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{service=\"{service}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    service: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{service=\"{service}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{service=\"{service}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{service=\"{service}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{service=\"{service}\"}} {cumulative}");
}

/// Write the per-outcome measure counter as one labeled family
fn write_outcomes(output: &mut String, service: &str, snapshot: &MetricsSnapshot) {
    let name = "bodymeasure_measure_requests_total";
    let _ = writeln!(output, "# HELP {name} Measure requests by outcome");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (outcome, val) in [
        ("success", snapshot.measure_success_total),
        ("rejected", snapshot.measure_rejected_total),
        ("unprocessable", snapshot.measure_unprocessable_total),
        ("failed", snapshot.measure_failed_total),
    ] {
        let _ = writeln!(output, "{name}{{service=\"{service}\",outcome=\"{outcome}\"}} {val}");
    }
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, service: &str) -> String {
    let snapshot = metrics.snapshot();
    let mut output = String::with_capacity(2048);

    write_metric(
        &mut output,
        "bodymeasure_http_requests_total",
        "HTTP requests received on any route",
        MetricType::Counter,
        service,
        snapshot.http_requests_total,
    );
    write_outcomes(&mut output, service, &snapshot);
    write_histogram(
        &mut output,
        "bodymeasure_measure_latency_ms",
        "Decode plus pose estimation plus derivation time in milliseconds",
        service,
        &snapshot.latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        snapshot.latency_sum_ms,
    );
    write_metric(
        &mut output,
        "bodymeasure_measure_latency_p99_ms",
        "99th percentile measure latency",
        MetricType::Gauge,
        service,
        snapshot.latency_p99_ms,
    );
    write_metric(
        &mut output,
        "bodymeasure_uptime_seconds",
        "Seconds since the service started",
        MetricType::Gauge,
        service,
        snapshot.uptime_secs,
    );

    output
}
