use std::net::SocketAddr;

use crate::config::EngineConfig;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: accepted booking writes. Labels: op.
pub const BOOKINGS_ACCEPTED_TOTAL: &str = "deskbook_bookings_accepted_total";

/// Counter: rejected booking requests. Labels: op, reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "deskbook_bookings_rejected_total";

/// Histogram: validate + conflict check + persist latency in seconds. Labels: op.
pub const ADMISSION_DURATION_SECONDS: &str = "deskbook_admission_duration_seconds";

/// Counter: recurring series instances processed. Labels: outcome.
pub const SERIES_INSTANCES_TOTAL: &str = "deskbook_series_instances_total";

/// Counter: approval decisions. Labels: decision.
pub const APPROVALS_TOTAL: &str = "deskbook_approvals_total";

// ── Side-effect delivery ────────────────────────────────────────

/// Counter: events delivered to notification sinks.
pub const NOTIFICATIONS_DELIVERED_TOTAL: &str = "deskbook_notifications_delivered_total";

/// Counter: sink deliveries that returned an error.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "deskbook_notifications_failed_total";

/// Counter: events dropped because the dispatch queue was full or closed.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "deskbook_notifications_dropped_total";

/// Install a fmt tracing subscriber honoring `RUST_LOG`. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Process entry point for hosts embedding the engine: tracing first, then
/// the exporter on `config.metrics_port` when one is set.
pub fn install(config: &EngineConfig) {
    init_tracing();
    init(config.metrics_port);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_port_is_noop() {
        init_tracing();
        init_tracing();
        init(None);
        install(&EngineConfig::default());
    }

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            BOOKINGS_ACCEPTED_TOTAL,
            BOOKINGS_REJECTED_TOTAL,
            ADMISSION_DURATION_SECONDS,
            SERIES_INSTANCES_TOTAL,
            APPROVALS_TOTAL,
            NOTIFICATIONS_DELIVERED_TOTAL,
            NOTIFICATIONS_FAILED_TOTAL,
            NOTIFICATIONS_DROPPED_TOTAL,
        ] {
            assert!(name.starts_with("deskbook_"), "{name}");
        }
    }
}
