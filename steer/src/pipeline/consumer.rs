//! Redis Stream consumer feeding the steering engine

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::pipeline::engine::SteerEvent;

/// Redis stream consumer for driver/state events
pub struct RedisConsumer {
    config: RedisConfig,
    event_tx: crossbeam_channel::Sender<SteerEvent>,
}

impl RedisConsumer {
    pub fn new(config: RedisConfig, event_tx: crossbeam_channel::Sender<SteerEvent>) -> Self {
        Self { config, event_tx }
    }

    async fn connect(&self) -> Result<MultiplexedConnection> {
        let client = Client::open(self.config.url.as_str())
            .with_context(|| format!("Failed to create Redis client: {}", self.config.url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| "Failed to connect to Redis")?;

        info!("Connected to Redis at {}", self.config.url);
        Ok(conn)
    }

    async fn ensure_consumer_group(&self, conn: &mut MultiplexedConnection) -> Result<()> {
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.events_stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(()) => {
                info!(group = %self.config.consumer_group, "created consumer group");
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("consumer group already exists");
            }
            Err(e) => {
                return Err(e).with_context(|| "Failed to create consumer group");
            }
        }

        Ok(())
    }

    /// Run the consumer loop
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut conn = self.connect().await?;
        self.ensure_consumer_group(&mut conn).await?;

        info!(
            stream = %self.config.events_stream,
            group = %self.config.consumer_group,
            "starting event consumer"
        );

        loop {
            if shutdown.try_recv().is_ok() {
                info!("Consumer received shutdown signal");
                break;
            }

            let result: redis::RedisResult<redis::Value> = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.config.consumer_group)
                .arg(&self.config.consumer_name)
                .arg("COUNT")
                .arg(self.config.batch_size)
                .arg("BLOCK")
                .arg(self.config.block_ms)
                .arg("STREAMS")
                .arg(&self.config.events_stream)
                .arg(">")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(redis::Value::Nil) => continue,
                Ok(value) => {
                    for (entry_id, data) in parse_stream_response(&value) {
                        match serde_json::from_str::<SteerEvent>(&data) {
                            Ok(event) => {
                                if self.event_tx.try_send(event).is_err() {
                                    warn!("engine channel full, dropping event");
                                }
                            }
                            Err(e) => {
                                warn!("Failed to parse steer event: {}", e);
                            }
                        }

                        let _: redis::RedisResult<i64> = redis::cmd("XACK")
                            .arg(&self.config.events_stream)
                            .arg(&self.config.consumer_group)
                            .arg(&entry_id)
                            .query_async(&mut conn)
                            .await;
                    }
                }
                Err(e) => {
                    error!("Error reading from stream: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }

        Ok(())
    }
}

/// Parse a Redis XREADGROUP response into (entry id, data) pairs.
fn parse_stream_response(value: &redis::Value) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    let streams = match value {
        redis::Value::Bulk(streams) => streams,
        _ => return entries,
    };
    for stream in streams {
        let stream_data = match stream {
            redis::Value::Bulk(data) if data.len() >= 2 => data,
            _ => continue,
        };
        let messages = match &stream_data[1] {
            redis::Value::Bulk(messages) => messages,
            _ => continue,
        };
        for message in messages {
            let msg_data = match message {
                redis::Value::Bulk(data) if data.len() >= 2 => data,
                _ => continue,
            };
            let entry_id = match value_to_string(&msg_data[0]) {
                Some(id) => id,
                None => continue,
            };
            let fields = match &msg_data[1] {
                redis::Value::Bulk(fields) => fields,
                _ => continue,
            };
            let mut i = 0;
            while i + 1 < fields.len() {
                if value_to_string(&fields[i]).as_deref() == Some("data") {
                    if let Some(data) = value_to_string(&fields[i + 1]) {
                        entries.push((entry_id.clone(), data));
                    }
                }
                i += 2;
            }
        }
    }

    entries
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}
