//! Pipeline orchestration
//!
//! Wires the async transport tasks to the single-threaded aggregation
//! engine: a Redis consumer task feeds the engine's command channel, the
//! engine runs on its own thread and pushes encoded reports back out, and a
//! publisher task delivers them to the report stream.

pub mod consumer;
pub mod engine;
pub mod publisher;

pub use consumer::RedisConsumer;
pub use engine::{Engine, EngineCommand, ReportOut};
pub use publisher::ReportPublisher;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::config::Config;
use crate::metrics::Metrics;

/// Backlog of the engine command channel; batches past it are dropped.
const ENGINE_QUEUE_DEPTH: usize = 1024;

/// Main pipeline orchestrator
pub struct Pipeline {
    config: Config,
    metrics: Arc<Metrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            metrics,
            shutdown_tx,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Start the pipeline and run until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!("Starting telemetry pipeline");

        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(ENGINE_QUEUE_DEPTH);
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        // engine thread owns the aggregator (built on the thread; the
        // aggregator's shared state is deliberately not Send); it stops when
        // every command sender is gone
        let agg_config = self.config.aggregation.clone();
        let engine_metrics = self.metrics();
        let engine_handle = std::thread::Builder::new()
            .name("aggr-engine".into())
            .spawn(move || {
                let engine = Engine::new(&agg_config, engine_metrics, report_tx);
                engine.run(cmd_rx);
            })
            .expect("spawning the engine thread");

        let consumer = RedisConsumer::new(self.config.redis.clone(), cmd_tx, self.metrics());
        let consumer_shutdown = self.shutdown_tx.subscribe();
        let consumer_handle = tokio::spawn(async move {
            if let Err(e) = consumer.run(consumer_shutdown).await {
                error!("Consumer error: {}", e);
            }
        });

        let publisher = ReportPublisher::new(self.config.redis.clone());
        let publisher_handle = tokio::spawn(async move {
            if let Err(e) = publisher.run(report_rx).await {
                error!("Publisher error: {}", e);
            }
        });

        // periodic stats logging
        let stats_handle = if self.config.metrics.enabled {
            let metrics = self.metrics();
            let period = self.config.metrics.log_period_secs.max(1);
            let mut shutdown = self.shutdown_tx.subscribe();
            Some(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(tokio::time::Duration::from_secs(period));
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => metrics.log_summary(),
                    }
                }
            }))
        } else {
            None
        };

        // the consumer returning drops the engine's only command sender,
        // which flushes and stops the engine thread
        let _ = consumer_handle.await;
        let _ = tokio::task::spawn_blocking(move || engine_handle.join()).await;
        let _ = publisher_handle.await;
        if let Some(h) = stats_handle {
            h.abort();
        }

        self.metrics.log_summary();
        info!("Pipeline stopped");
        Ok(())
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
