use std::net::SocketAddr;
use std::time::Instant;

use axum::{extract::MatchedPath, extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};

pub const HTTP_REQUESTS_TOTAL: &str = "cohort_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "cohort_http_request_duration_seconds";
pub const RECORDS_CREATED_TOTAL: &str = "cohort_records_created_total";
pub const LOGIN_ATTEMPTS_TOTAL: &str = "cohort_login_attempts_total";

/// Install the Prometheus exporter on its own listener.
pub fn init_metrics(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}

/// Per-request counter and latency histogram, labelled by route template.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(started.elapsed().as_secs_f64());

    response
}

pub fn record_created(kind: &'static str, count: u64) {
    metrics::counter!(RECORDS_CREATED_TOTAL, "kind" => kind).increment(count);
}

pub fn record_login(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(LOGIN_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}
