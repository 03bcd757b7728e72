//! Aggregation engine thread
//!
//! The aggregator is deliberately single-threaded: every mutation (sample
//! batch, peer merge, window cadence) runs to completion on one dedicated
//! thread, fed through a channel. The channel receive timeout doubles as the
//! window clock, so there is no separate timer source to race against.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::aggr::{zone, Aggregator, AggregatorConfig, ReportType};
use crate::config::AggregationConfig;
use crate::flow::FlowSample;
use crate::metrics::Metrics;
use crate::report::NodeInfo;

/// Work items delivered to the engine thread.
pub enum EngineCommand {
    /// A batch of sampled flow counters.
    Samples(Vec<FlowSample>),
    /// A serialized flow report from a peer process.
    PeerReport(Vec<u8>),
}

/// An encoded report ready for publication.
pub struct ReportOut {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub struct Engine {
    aggr: Aggregator,
    interval: Duration,
    windows_per_report: usize,
    topic: String,
    metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(
        config: &AggregationConfig,
        metrics: Arc<Metrics>,
        report_tx: UnboundedSender<ReportOut>,
    ) -> Engine {
        let report_type = match config.report_type.as_str() {
            "absolute" => ReportType::Absolute,
            _ => ReportType::Relative,
        };
        let mut aggr = Aggregator::new(AggregatorConfig {
            node: NodeInfo {
                node_id: config.node_id.clone(),
                location_id: config.location_id.clone(),
            },
            num_windows: config.num_windows,
            max_reports_per_window: config.max_reports_per_window,
            acc_ttl_secs: config.acc_ttl_secs,
            report_type,
            report_all_samples: config.report_all_samples,
            ct_zone: config.ct_zone,
        });

        aggr.hooks.emit = Some(Box::new(move |topic: &str, payload: &[u8]| {
            report_tx
                .send(ReportOut {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok()
        }));

        Engine {
            aggr,
            interval: Duration::from_secs(config.window_interval_secs),
            windows_per_report: config.num_windows,
            topic: config.report_topic.clone(),
            metrics,
        }
    }

    fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Samples(mut samples) => {
                if self.aggr.ct_zone() == u16::MAX {
                    zone::merge_zones(&mut samples);
                }
                let now = Utc::now();
                self.metrics.samples_total.inc_by(samples.len() as u64);
                for sample in &samples {
                    self.aggr.add_sample(&sample.key, sample.counters, now);
                }
            }
            EngineCommand::PeerReport(buf) => {
                self.metrics.peer_reports.inc();
                match self.aggr.update_from_peer(&buf, Utc::now()) {
                    Ok(merged) => {
                        self.metrics.peer_flows_merged.inc_by(merged as u64);
                    }
                    Err(err) => {
                        warn!(error = %err, "peer report did not decode");
                        self.metrics.decode_warnings.inc();
                    }
                }
            }
        }
    }

    fn tick(&mut self, closed_windows: &mut usize) {
        let now = Utc::now();
        if self.aggr.close_active_window(now) {
            self.metrics.windows_closed.inc();
            *closed_windows += 1;
        }
        self.metrics
            .flows_tracked
            .set(self.aggr.total_flows() as i64);
        self.metrics.held_flows.set(self.aggr.held_flows() as i64);

        if *closed_windows >= self.windows_per_report {
            if self.aggr.send_report(&self.topic, now) {
                self.metrics.reports_sent.inc();
                *closed_windows = 0;
            } else {
                // emission failed; windows stay queued and the next tick
                // retries
                debug!("report not sent, retrying next interval");
            }
        }
        self.aggr.activate_window(Utc::now());
    }

    /// Run until every command sender is gone.
    pub fn run(mut self, rx: Receiver<EngineCommand>) {
        info!(
            interval_secs = self.interval.as_secs(),
            windows = self.windows_per_report,
            topic = %self.topic,
            "aggregation engine started"
        );

        let mut closed_windows = 0usize;
        self.aggr.activate_window(Utc::now());
        let mut next_close = Instant::now() + self.interval;

        loop {
            let timeout = next_close.saturating_duration_since(Instant::now());
            match rx.recv_timeout(timeout) {
                Ok(cmd) => self.handle(cmd),
                Err(RecvTimeoutError::Timeout) => {
                    self.tick(&mut closed_windows);
                    next_close += self.interval;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("command channel closed, flushing final window");
                    let now = Utc::now();
                    if self.aggr.close_active_window(now) {
                        self.metrics.windows_closed.inc();
                    }
                    if self.aggr.send_report(&self.topic, now) {
                        self.metrics.reports_sent.inc();
                    }
                    break;
                }
            }
        }

        info!("aggregation engine stopped");
    }
}
