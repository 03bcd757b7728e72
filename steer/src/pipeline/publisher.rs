//! Redis Streams publisher for steering directives

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};

use crate::config::RedisConfig;
use crate::pipeline::engine::SteerCommand;

/// Publishes steering commands onto the command stream.
pub struct CommandPublisher {
    config: RedisConfig,
}

impl CommandPublisher {
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<MultiplexedConnection> {
        let client = Client::open(self.config.url.as_str())
            .with_context(|| format!("Failed to create Redis client: {}", self.config.url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| "Failed to connect to Redis")?;

        Ok(conn)
    }

    /// Drain the command channel until the engine side closes it.
    pub async fn run(&self, mut command_rx: UnboundedReceiver<SteerCommand>) -> Result<()> {
        let mut conn = self.connect().await?;
        let stream = &self.config.commands_stream;

        info!(stream, "command publisher started");

        while let Some(command) = command_rx.recv().await {
            let json = match serde_json::to_string(&command) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize command: {}", e);
                    continue;
                }
            };

            let result: redis::RedisResult<String> = redis::cmd("XADD")
                .arg(stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.max_stream_length)
                .arg("*")
                .arg("data")
                .arg(&json)
                .query_async(&mut conn)
                .await;

            match result {
                Ok(entry_id) => {
                    debug!(entry_id = %entry_id, "command published");
                }
                Err(e) => {
                    error!("Failed to publish command: {}", e);
                }
            }
        }

        info!("command publisher stopped");
        Ok(())
    }
}
