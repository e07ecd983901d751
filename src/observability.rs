use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Admission ───────────────────────────────────────────────────

/// Counter: booking requests. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "staybook_admissions_total";

/// Histogram: admission latency in seconds, lock wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "staybook_admission_duration_seconds";

// ── Lifecycle ───────────────────────────────────────────────────

/// Counter: booking status transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "staybook_transitions_total";

/// Counter: bookings completed by the background sweeper.
pub const SWEPT_COMPLETIONS_TOTAL: &str = "staybook_swept_completions_total";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: listings held in memory.
pub const LISTINGS_LOADED: &str = "staybook_listings_loaded";

/// Histogram: log group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: log group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Counter: verification mails that failed to dispatch.
pub const MAIL_FAILURES_TOTAL: &str = "staybook_mail_failures_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for an admission result.
pub fn outcome_label(result: &Result<(), &EngineError>) -> &'static str {
    match result {
        Ok(()) => "admitted",
        Err(EngineError::InvalidStayLength { .. }) => "invalid_stay_length",
        Err(EngineError::ListingUnavailable { .. }) => "listing_unavailable",
        Err(EngineError::DateBlocked { .. }) => "date_blocked",
        Err(EngineError::Overlap(_)) => "overlap",
        Err(EngineError::Unauthorized(_)) => "unauthorized",
        Err(EngineError::Cancelled) => "cancelled",
        Err(EngineError::Storage { .. }) => "storage_error",
        Err(_) => "rejected",
    }
}
