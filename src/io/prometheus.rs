//! Prometheus text exposition
//!
//! Renders a [`MetricsSummary`] in Prometheus text format; served at
//! `/metrics` by the API server. Every series carries a `site` label.

use crate::infra::metrics::{MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with cumulative buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, site_id: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_pipeline_metrics(&mut output, site_id, summary);
    write_latency_metrics(&mut output, site_id, summary);
    write_queue_metrics(&mut output, site_id, summary);

    output
}

fn write_pipeline_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "brt_images_total",
        "Images run through the detection pipeline",
        MetricType::Counter,
        site,
        summary.images_total,
    );
    write_gauge_f64(
        output,
        "brt_images_per_min",
        "Images processed per minute since the last report",
        site,
        summary.images_per_min,
    );
    write_metric(
        output,
        "brt_lines_identified_total",
        "Images where a registered line was read",
        MetricType::Counter,
        site,
        summary.lines_identified_total,
    );
    write_metric(
        output,
        "brt_no_line_total",
        "Images where no line was identified",
        MetricType::Counter,
        site,
        summary.no_line_total,
    );
    write_metric(
        output,
        "brt_decode_errors_total",
        "Uploads that could not be decoded as images",
        MetricType::Counter,
        site,
        summary.decode_errors_total,
    );
    write_metric(
        output,
        "brt_localization_failures_total",
        "Object detection backend failures or timeouts",
        MetricType::Counter,
        site,
        summary.localization_failures_total,
    );
    write_metric(
        output,
        "brt_recognition_unavailable_total",
        "Images where the OCR backend was unavailable",
        MetricType::Counter,
        site,
        summary.recognition_unavailable_total,
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "brt_pipeline_latency_ms",
        "Pipeline latency in milliseconds",
        site,
        &summary.lat_buckets,
        summary.latency_sum_ms,
    );

    write_metric(
        output,
        "brt_pipeline_latency_p50_ms",
        "50th percentile pipeline latency",
        MetricType::Gauge,
        site,
        summary.lat_p50_ms,
    );
    write_metric(
        output,
        "brt_pipeline_latency_p95_ms",
        "95th percentile pipeline latency",
        MetricType::Gauge,
        site,
        summary.lat_p95_ms,
    );
    write_metric(
        output,
        "brt_pipeline_latency_p99_ms",
        "99th percentile pipeline latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_ms,
    );
    write_metric(
        output,
        "brt_pipeline_latency_max_ms",
        "Maximum pipeline latency since the last report",
        MetricType::Gauge,
        site,
        summary.max_latency_ms,
    );
}

fn write_queue_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "brt_arrivals_recorded_total",
        "Arrivals added to the queue",
        MetricType::Counter,
        site,
        summary.arrivals_recorded_total,
    );
    write_metric(
        output,
        "brt_arrivals_rejected_total",
        "Arrivals rejected for an unknown line",
        MetricType::Counter,
        site,
        summary.arrivals_rejected_total,
    );
    write_metric(
        output,
        "brt_arrivals_expired_total",
        "Arrivals expired past their prediction",
        MetricType::Counter,
        site,
        summary.arrivals_expired_total,
    );
    write_metric(
        output,
        "brt_arrivals_confirmed_total",
        "Arrivals confirmed at the stop",
        MetricType::Counter,
        site,
        summary.arrivals_confirmed_total,
    );
    write_metric(
        output,
        "brt_arrivals_purged_total",
        "Arrivals deleted by the retention sweep",
        MetricType::Counter,
        site,
        summary.arrivals_purged_total,
    );
    write_metric(
        output,
        "brt_arrivals_en_route",
        "Arrivals currently en route",
        MetricType::Gauge,
        site,
        summary.en_route_arrivals as u64,
    );
    write_metric(
        output,
        "brt_egress_dropped_total",
        "Arrival log entries dropped due to channel full",
        MetricType::Counter,
        site,
        summary.egress_dropped_total,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::{Metrics, PipelineOutcome};

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_image_processed(PipelineOutcome::LineIdentified, 150);
        metrics.record_image_processed(PipelineOutcome::NoLine, 250);
        metrics.record_arrival_recorded();

        let output = format_prometheus_metrics(&metrics.snapshot(4), "recife");

        assert!(output.contains("brt_images_total{site=\"recife\"} 2"));
        assert!(output.contains("brt_pipeline_latency_ms_bucket{site=\"recife\""));
        assert!(output.contains("brt_pipeline_latency_ms_bucket{site=\"recife\",le=\"+Inf\"} 2"));
        assert!(output.contains("brt_pipeline_latency_ms_sum{site=\"recife\"} 400"));
        assert!(output.contains("brt_pipeline_latency_ms_count{site=\"recife\"} 2"));
        assert!(output.contains("brt_arrivals_recorded_total{site=\"recife\"} 1"));
        assert!(output.contains("brt_arrivals_en_route{site=\"recife\"} 4"));
    }
}
