//! Pipeline orchestration
//!
//! Same shape as the telemetry daemon: an async consumer feeds the
//! single-threaded steering engine over a channel, and a publisher delivers
//! the engine's directives back onto a stream.

pub mod consumer;
pub mod engine;
pub mod publisher;

pub use consumer::RedisConsumer;
pub use engine::{Engine, SteerCommand, SteerEvent};
pub use publisher::CommandPublisher;

use anyhow::Result;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::config::Config;

/// Backlog of the engine event channel.
const ENGINE_QUEUE_DEPTH: usize = 1024;

/// Main pipeline orchestrator
pub struct Pipeline {
    config: Config,
    shutdown_tx: broadcast::Sender<()>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Start the pipeline and run until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!("Starting steering pipeline");

        let (event_tx, event_rx) = crossbeam_channel::bounded(ENGINE_QUEUE_DEPTH);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        // engine thread owns every station's policy stack (built on the
        // thread; mediators and stacks are deliberately not Send)
        let stations = self.config.stations.clone();
        let tick = Duration::from_millis(self.config.engine.tick_ms);
        let engine_handle = std::thread::Builder::new()
            .name("steer-engine".into())
            .spawn(move || {
                let engine = Engine::new(&stations, tick, command_tx);
                engine.run(event_rx);
            })
            .expect("spawning the engine thread");

        let consumer = RedisConsumer::new(self.config.redis.clone(), event_tx);
        let consumer_shutdown = self.shutdown_tx.subscribe();
        let consumer_handle = tokio::spawn(async move {
            if let Err(e) = consumer.run(consumer_shutdown).await {
                error!("Consumer error: {}", e);
            }
        });

        let publisher = CommandPublisher::new(self.config.redis.clone());
        let publisher_handle = tokio::spawn(async move {
            if let Err(e) = publisher.run(command_rx).await {
                error!("Publisher error: {}", e);
            }
        });

        let _ = consumer_handle.await;
        let _ = tokio::task::spawn_blocking(move || engine_handle.join()).await;
        let _ = publisher_handle.await;

        info!("Pipeline stopped");
        Ok(())
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
