//! Prometheus metrics endpoint and metric descriptions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers help text for the metrics this service emits.
pub fn describe() {
    metrics::describe_counter!(
        "webhook_events_total",
        "Webhook deliveries handled, by outcome"
    );
    metrics::describe_histogram!(
        "webhook_duration_seconds",
        Unit::Seconds,
        "Time spent handling one webhook delivery"
    );
    metrics::describe_counter!(
        "ratelimit_rejections_total",
        "Requests refused by the rate limiter, by policy class"
    );
    metrics::describe_counter!(
        "side_effects_total",
        "Voucher and notification jobs, by result"
    );
    metrics::describe_counter!("vouchers_issued_total", "Vouchers issued");
    metrics::describe_counter!("admin_logins_total", "Administrator login attempts");
    metrics::describe_counter!(
        "ledger_purged_total",
        "Processed-event records removed after the retention window"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
