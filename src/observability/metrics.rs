//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_active_tunnels` (gauge): CONNECT tunnels currently relaying
//! - `proxy_relay_bytes_total` (counter): tunnel bytes by direction
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    ::metrics::describe_counter!("proxy_requests_total", "Proxied requests by method and status");
    ::metrics::describe_histogram!(
        "proxy_request_duration_seconds",
        "Time from request receipt to response head"
    );
    ::metrics::describe_gauge!("proxy_active_tunnels", "CONNECT tunnels currently relaying");
    ::metrics::describe_counter!("proxy_relay_bytes_total", "Bytes relayed through tunnels");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one answered request.
pub fn record_request(method: &str, status: u16, started: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.clone(),
        "status" => status.clone()
    )
    .increment(1);
    ::metrics::histogram!(
        "proxy_request_duration_seconds",
        "method" => method,
        "status" => status
    )
    .record(started.elapsed().as_secs_f64());
}

pub fn record_tunnel_opened() {
    ::metrics::gauge!("proxy_active_tunnels").increment(1.0);
}

pub fn record_tunnel_closed() {
    ::metrics::gauge!("proxy_active_tunnels").decrement(1.0);
}

/// Count bytes copied in one relay direction.
pub fn record_relay_bytes(direction: &'static str, bytes: u64) {
    if bytes == 0 {
        return;
    }
    ::metrics::counter!("proxy_relay_bytes_total", "direction" => direction).increment(bytes);
}
