//! Redis Streams publisher for emitted flow reports

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::config::RedisConfig;
use crate::pipeline::engine::ReportOut;
use skylink_msgbus::Msg;

/// Publishes serialized reports onto the report stream.
pub struct ReportPublisher {
    config: RedisConfig,
}

impl ReportPublisher {
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

    /// Drain the report channel until the engine side closes it.
    pub async fn run(&self, mut report_rx: UnboundedReceiver<ReportOut>) -> Result<()> {
        let mut conn = self.connect().await?;
        let stream = &self.config.report_stream;

        info!(stream, "report publisher started");

        while let Some(report) = report_rx.recv().await {
            // the binary payload crosses the json stream through the message
            // tree's base64 sentinel
            let envelope = Msg::Bin(report.payload).to_json_string();

            let result: redis::RedisResult<String> = redis::cmd("XADD")
                .arg(stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.max_stream_length)
                .arg("*")
                .arg("topic")
                .arg(&report.topic)
                .arg("data")
                .arg(&envelope)
                .query_async(&mut conn)
                .await;

            match result {
                Ok(entry_id) => {
                    debug!(topic = %report.topic, entry_id = %entry_id, "report published");
                }
                Err(e) => {
                    tracing::error!("Failed to publish report: {}", e);
                }
            }
        }

        info!("report publisher stopped");
        Ok(())
    }
}
