//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

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

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
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

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_sample_metrics(&mut output, site_id, &summary);
    write_deviation_metrics(&mut output, site_id, &summary);
    write_buffer_metrics(&mut output, site_id, &summary);
    write_drop_metrics(&mut output, site_id, &summary);

    output
}

fn write_sample_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "route_guard_samples_total",
        "Total location samples processed",
        MetricType::Counter,
        site,
        summary.samples_total,
    );
    let _ = writeln!(output, "# HELP route_guard_samples_per_sec Samples processed per second");
    let _ = writeln!(output, "# TYPE route_guard_samples_per_sec gauge");
    let _ = writeln!(
        output,
        "route_guard_samples_per_sec{{site=\"{site}\"}} {:.2}",
        summary.samples_per_sec
    );

    write_histogram(
        output,
        "route_guard_sample_latency_us",
        "Sample processing latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "route_guard_sample_latency_p99_us",
        "99th percentile sample latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_deviation_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "route_guard_active_sessions",
        "Persons with a running session",
        MetricType::Gauge,
        site,
        summary.active_sessions,
    );
    write_metric(
        output,
        "route_guard_off_route_sessions",
        "Sessions currently confirmed off-route",
        MetricType::Gauge,
        site,
        summary.off_route_sessions,
    );

    let counters = [
        ("route_guard_excursions_started_total", "Excursions entering pending", summary.excursions_started),
        ("route_guard_excursions_confirmed_total", "Excursions confirmed off-route", summary.excursions_confirmed),
        ("route_guard_excursions_cancelled_total", "Excursions ended before confirmation", summary.excursions_cancelled),
        ("route_guard_returns_total", "Confirmed excursions ended", summary.returns_total),
        ("route_guard_fail_open_total", "Sessions forced on-route", summary.fail_open_resets),
        ("route_guard_notifications_sent_total", "Caregiver notifications delivered", summary.notifications_sent),
        ("route_guard_notifications_failed_total", "Caregiver notifications failed", summary.notifications_failed),
        ("route_guard_alarm_cues_total", "Alarm cues played", summary.alarm_cues),
        ("route_guard_directional_cues_total", "Directional cues played", summary.directional_cues),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, site, val);
    }
}

fn write_buffer_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "route_guard_buffers_built_total",
        "Buffer polygons built",
        MetricType::Counter,
        site,
        summary.buffers_built,
    );
    write_metric(
        output,
        "route_guard_buffers_failed_total",
        "Buffer polygons that failed or were rejected",
        MetricType::Counter,
        site,
        summary.buffers_failed,
    );
}

fn write_drop_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "route_guard_stale_samples_total",
        "Samples dropped as out of order or duplicate",
        MetricType::Counter,
        site,
        summary.stale_samples_dropped,
    );
    write_metric(
        output,
        "route_guard_ingress_dropped_total",
        "Inbound messages dropped (unparseable or channel full)",
        MetricType::Counter,
        site,
        summary.ingress_dropped,
    );
    write_metric(
        output,
        "route_guard_session_inputs_dropped_total",
        "Session inputs dropped on a full session queue",
        MetricType::Counter,
        site,
        summary.session_inputs_dropped,
    );
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            let mut response = text_response(StatusCode::OK, body);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("bind metrics port {port}"))?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_sample_processed(150);
        metrics.record_sample_processed(250);
        metrics.record_excursion_started();
        metrics.record_excursion_confirmed();
        metrics.set_active_sessions(3);

        let output = format_prometheus_metrics(&metrics, "ward-2");

        assert!(output.contains("route_guard_samples_total{site=\"ward-2\"} 2"));
        assert!(output.contains("route_guard_sample_latency_us_bucket{site=\"ward-2\",le=\"+Inf\"} 2"));
        assert!(output.contains("route_guard_excursions_confirmed_total{site=\"ward-2\"} 1"));
        assert!(output.contains("route_guard_active_sessions{site=\"ward-2\"} 3"));
        assert!(output.contains("route_guard_off_route_sessions{site=\"ward-2\"} 1"));
    }
}
