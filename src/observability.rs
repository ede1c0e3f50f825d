use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "charter_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "charter_query_duration_seconds";

/// Counter: admission outcomes. Labels: outcome (granted, conflict, rejected).
pub const ADMISSIONS_TOTAL: &str = "charter_admissions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "charter_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "charter_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "charter_connections_rejected_total";

/// Gauge: number of active tenants (loaded fleets).
pub const TENANTS_ACTIVE: &str = "charter_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "charter_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "charter_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBus { .. } => "insert_bus",
        Command::UpdateBus { .. } => "update_bus",
        Command::SetBusStatus { .. } => "set_bus_status",
        Command::RetireBus { .. } => "retire_bus",
        Command::RestoreBus { .. } => "restore_bus",
        Command::SelectBuses { .. } => "select_buses",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::ApproveReservation { .. } => "approve_reservation",
        Command::RejectReservation { .. } => "reject_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::Listen { .. } => "listen",
    }
}
