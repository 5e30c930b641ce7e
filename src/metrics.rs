//! Prometheus metrics for the dispatch core.
//!
//! Metrics are exposed on a dedicated HTTP listener when `METRICS_PORT` is set.
//! Recording functions are safe to call before (or without) initialization;
//! the `metrics` facade drops values when no recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `waypoint_requests_total` - Requests seen by the logger (labels: route, method, status)
//! - `waypoint_rate_limited_total` - Requests rejected by the rate limiter
//! - `waypoint_panics_recovered_total` - Panics caught by the recovery middleware
//!
//! ## Histograms
//! - `waypoint_request_duration_seconds` - Chain duration (labels: route, method, status)
//!
//! ## Gauges
//! - `waypoint_routes_registered` - Number of routes in the table

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "waypoint_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "waypoint_request_duration_seconds";
    pub const RATE_LIMITED_TOTAL: &str = "waypoint_rate_limited_total";
    pub const PANICS_RECOVERED_TOTAL: &str = "waypoint_panics_recovered_total";
    pub const ROUTES_REGISTERED: &str = "waypoint_routes_registered";
}

/// Route label for requests that matched no pattern.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Install the Prometheus exporter and describe every metric.
///
/// # Errors
///
/// Returns a message when the exporter cannot be installed (for example the
/// port is taken or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of requests dispatched");
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::PANICS_RECOVERED_TOTAL,
        "Total number of handler panics recovered"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Middleware chain duration in seconds"
    );
    describe_gauge!(names::ROUTES_REGISTERED, "Number of registered routes");

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record one finished request.
pub fn record_request(route: &str, method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "route" => route.to_string(), "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "route" => route.to_string(), "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_panic_recovered() {
    counter!(names::PANICS_RECOVERED_TOTAL).increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn set_routes_registered(count: usize) {
    gauge!(names::ROUTES_REGISTERED).set(count as f64);
}
