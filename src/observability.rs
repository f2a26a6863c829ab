use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "shareit_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "shareit_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking requests accepted as WAITING.
pub const BOOKINGS_CREATED_TOTAL: &str = "shareit_bookings_created_total";

/// Counter: owner decisions committed. Labels: status.
pub const BOOKINGS_DECIDED_TOTAL: &str = "shareit_bookings_decided_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "shareit_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "shareit_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "shareit_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shareit_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shareit_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertItem { .. } => "insert_item",
        Command::SetItemAvailability { .. } => "set_item_availability",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DecideBooking { .. } => "decide_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
    }
}
