use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "appointd_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "appointd_http_request_duration_seconds";

// ── Booking core ────────────────────────────────────────────────

/// Counter: availability queries. Labels: outcome (slots, empty, invalid_date, source_unavailable).
pub const SLOT_QUERIES_TOTAL: &str = "appointd_slot_queries_total";

/// Counter: booking operations. Labels: operation, outcome.
pub const BOOKING_OPERATIONS_TOTAL: &str = "appointd_booking_operations_total";

/// Counter: notification dispatches. Labels: channel (email, sms), outcome.
pub const NOTIFICATIONS_TOTAL: &str = "appointd_notifications_total";

/// Counter: reminders handled by the sweep. Labels: threshold, outcome (sent, failed, no_phone).
pub const REMINDERS_TOTAL: &str = "appointd_reminders_total";

/// Histogram: reminder sweep duration in seconds.
pub const REMINDER_SWEEP_DURATION_SECONDS: &str = "appointd_reminder_sweep_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: entries currently held in the per-identity lock map.
pub const IDENTITY_LOCKS_ACTIVE: &str = "appointd_identity_locks_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "appointd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "appointd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a booking failure, for the `outcome` metric label.
pub fn error_label(err: &crate::engine::BookingError) -> &'static str {
    use crate::engine::BookingError;
    match err {
        BookingError::PastDate => "past_date",
        BookingError::SameDay => "same_day",
        BookingError::Overlap => "overlap",
        BookingError::NotFound => "not_found",
        BookingError::Cancelled(_) => "cancelled",
        BookingError::BelowMinimumBudget { .. } => "below_minimum_budget",
        BookingError::Validation(_) => "validation",
        BookingError::SourceUnavailable(_) => "source_unavailable",
        BookingError::Internal(_) => "internal",
    }
}
