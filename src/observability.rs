use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "slotbook_bookings_confirmed_total";

/// Counter: booking requests refused. Labels: reason.
pub const BOOKING_REJECTIONS_TOTAL: &str = "slotbook_booking_rejections_total";

/// Counter: commit attempts that lost a race and were retried.
pub const COMMIT_RETRIES_TOTAL: &str = "slotbook_commit_retries_total";

/// Counter: logins refused for an unlisted user name.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotbook_bookings_cancelled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Gauge: providers loaded in the engine.
pub const PROVIDERS_ACTIVE: &str = "slotbook_providers_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProvider { .. } => "insert_provider",
        Command::InsertService(_) => "insert_service",
        Command::ArchiveService { .. } => "archive_service",
        Command::DeleteService { .. } => "delete_service",
        Command::InsertClient(_) => "insert_client",
        Command::DeleteClient { .. } => "delete_client",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::DeleteAvailability { .. } => "delete_availability",
        Command::InsertBreak { .. } => "insert_break",
        Command::DeleteBreak { .. } => "delete_break",
        Command::InsertException { .. } => "insert_exception",
        Command::DeleteException { .. } => "delete_exception",
        Command::InsertBooking(_) => "insert_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::CompleteBooking { .. } => "complete_booking",
        Command::InsertPayment(_) => "insert_payment",
        Command::SelectOpenSlots { .. } => "select_open_slots",
        Command::SelectOpenIntervals { .. } => "select_open_intervals",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookingByRef { .. } => "select_booking_by_ref",
        Command::SelectProviders => "select_providers",
        Command::SelectServices => "select_services",
        Command::SelectClients => "select_clients",
    }
}
