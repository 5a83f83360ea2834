use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "salonbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "salonbook_http_request_duration_seconds";

/// Counter: booking operations. Labels: op, outcome (`ok` or error code).
pub const BOOKINGS_TOTAL: &str = "salonbook_bookings_total";

/// Histogram: booking operation latency in seconds, retries included. Labels: op.
pub const BOOKING_DURATION_SECONDS: &str = "salonbook_booking_duration_seconds";

/// Counter: candidate spans rejected by the conflict detector.
pub const SLOT_CONFLICTS_TOTAL: &str = "salonbook_slot_conflicts_total";

/// Counter: retries after a schedule lock timeout. Labels: op.
pub const LOCK_RETRIES_TOTAL: &str = "salonbook_lock_retries_total";

/// Counter: domain events published. Labels: event.
pub const EVENTS_PUBLISHED_TOTAL: &str = "salonbook_events_published_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "salonbook_tenants_active";

/// Counter: requests rejected for a missing or wrong bearer token.
pub const AUTH_FAILURES_TOTAL: &str = "salonbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salonbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salonbook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: outcome.
pub const WAL_COMPACTIONS_TOTAL: &str = "salonbook_wal_compactions_total";

/// Install the Prometheus exporter on `addr`. No-op when `addr` is `None`.
pub fn init(addr: Option<SocketAddr>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(addr) = addr else { return Ok(()) };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}
