use std::net::SocketAddr;

use crate::booking::Outcome;

// ── Attempt metrics ─────────────────────────────────────────────

/// Counter: booking attempts finished. Labels: outcome, mode.
pub const ATTEMPTS_TOTAL: &str = "seatlock_attempts_total";

/// Histogram: wall time of one attempt, begin to commit/rollback. Labels: mode.
pub const ATTEMPT_DURATION_SECONDS: &str = "seatlock_attempt_duration_seconds";

// ── Store metrics ───────────────────────────────────────────────

/// Histogram: time spent parked on a row lock. Labels: strategy.
pub const LOCK_WAIT_SECONDS: &str = "seatlock_lock_wait_seconds";

/// Counter: rows passed over by skip-contended scans.
pub const ROWS_SKIPPED_TOTAL: &str = "seatlock_rows_skipped_total";

/// Gauge: transactions begun and not yet closed.
pub const TRANSACTIONS_OPEN: &str = "seatlock_transactions_open";

/// Counter: commits rejected by the backend.
pub const COMMIT_FAILURES_TOTAL: &str = "seatlock_commit_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}

/// Map an Outcome variant to a short label for metrics.
pub fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Booked(_) => "booked",
        Outcome::ContendedSkipped { .. } => "contended_skipped",
        Outcome::ContendedFailed(_) => "contended_failed",
        Outcome::AlreadyTaken => "already_taken",
        Outcome::NotFound => "not_found",
        Outcome::TransactionError(_) => "transaction_error",
    }
}
