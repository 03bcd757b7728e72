//! Prometheus metrics for the telemetry daemon

use anyhow::Result;
use prometheus::{IntCounter, IntGauge, Registry};
use tracing::info;

/// Daemon-wide counters and gauges. Shared across the pipeline tasks and the
/// aggregation engine thread.
pub struct Metrics {
    registry: Registry,
    pub samples_total: IntCounter,
    pub samples_dropped: IntCounter,
    pub peer_reports: IntCounter,
    pub peer_flows_merged: IntCounter,
    pub decode_warnings: IntCounter,
    pub windows_closed: IntCounter,
    pub reports_sent: IntCounter,
    pub flows_tracked: IntGauge,
    pub held_flows: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Metrics> {
        let registry = Registry::new();

        let samples_total =
            IntCounter::new("skylink_samples_total", "Flow samples consumed")?;
        let samples_dropped = IntCounter::new(
            "skylink_samples_dropped",
            "Flow samples dropped on the engine channel",
        )?;
        let peer_reports =
            IntCounter::new("skylink_peer_reports_total", "Peer reports received")?;
        let peer_flows_merged = IntCounter::new(
            "skylink_peer_flows_merged_total",
            "Flow keys merged from peer reports",
        )?;
        let decode_warnings = IntCounter::new(
            "skylink_decode_warnings_total",
            "Malformed payloads skipped",
        )?;
        let windows_closed =
            IntCounter::new("skylink_windows_closed_total", "Observation windows closed")?;
        let reports_sent =
            IntCounter::new("skylink_reports_sent_total", "Flow reports emitted")?;
        let flows_tracked =
            IntGauge::new("skylink_flows_tracked", "Flow accumulators currently tracked")?;
        let held_flows = IntGauge::new(
            "skylink_held_flows",
            "Expired accumulators pinned by references",
        )?;

        registry.register(Box::new(samples_total.clone()))?;
        registry.register(Box::new(samples_dropped.clone()))?;
        registry.register(Box::new(peer_reports.clone()))?;
        registry.register(Box::new(peer_flows_merged.clone()))?;
        registry.register(Box::new(decode_warnings.clone()))?;
        registry.register(Box::new(windows_closed.clone()))?;
        registry.register(Box::new(reports_sent.clone()))?;
        registry.register(Box::new(flows_tracked.clone()))?;
        registry.register(Box::new(held_flows.clone()))?;

        Ok(Metrics {
            registry,
            samples_total,
            samples_dropped,
            peer_reports,
            peer_flows_merged,
            decode_warnings,
            windows_closed,
            reports_sent,
            flows_tracked,
            held_flows,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// One-line operational summary through the logging layer.
    pub fn log_summary(&self) {
        info!(
            samples = self.samples_total.get(),
            dropped = self.samples_dropped.get(),
            peer_reports = self.peer_reports.get(),
            merged = self.peer_flows_merged.get(),
            windows = self.windows_closed.get(),
            reports = self.reports_sent.get(),
            flows = self.flows_tracked.get(),
            held = self.held_flows.get(),
            "telemetry stats"
        );
    }
}
