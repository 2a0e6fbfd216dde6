use std::net::SocketAddr;

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands dispatched. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "holdfast_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "holdfast_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "holdfast_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "holdfast_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "holdfast_connections_rejected_total";

/// Counter: handshake failures.
pub const AUTH_FAILURES_TOTAL: &str = "holdfast_auth_failures_total";

/// Counter: broadcast deliveries dropped. Labels: reason.
pub const BROADCASTS_DROPPED_TOTAL: &str = "holdfast_broadcasts_dropped_total";

/// Counter: pending locks released by the reaper.
pub const LOCKS_REAPED_TOTAL: &str = "holdfast_locks_reaped_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Help => "help",
        Command::HelpFor(_) => "help_command",
        Command::List => "list",
        Command::Lock { .. } => "lock",
        Command::Unlock { .. } => "unlock",
        Command::Reserve { .. } => "reserve",
        Command::Update { .. } => "update",
        Command::Cancel { .. } => "cancel",
    }
}
