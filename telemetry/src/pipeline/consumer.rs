//! Redis Stream consumer feeding the aggregation engine

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::flow::FlowSample;
use crate::metrics::Metrics;
use crate::pipeline::engine::EngineCommand;
use skylink_msgbus::Msg;

/// Redis stream consumer for flow samples and peer reports
pub struct RedisConsumer {
    config: RedisConfig,
    cmd_tx: crossbeam_channel::Sender<EngineCommand>,
    metrics: Arc<Metrics>,
}

impl RedisConsumer {
    pub fn new(
        config: RedisConfig,
        cmd_tx: crossbeam_channel::Sender<EngineCommand>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            cmd_tx,
            metrics,
        }
    }

    /// Connect to Redis
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

    /// Ensure the consumer group exists on one stream
    async fn ensure_consumer_group(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
    ) -> Result<()> {
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream, group = %self.config.consumer_group, "created consumer group");
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream, "consumer group already exists");
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
        let samples_stream = self.config.samples_stream.clone();
        let peer_stream = self.config.peer_stream.clone();
        self.ensure_consumer_group(&mut conn, &samples_stream).await?;
        self.ensure_consumer_group(&mut conn, &peer_stream).await?;

        info!(
            samples = %samples_stream,
            peer = %peer_stream,
            group = %self.config.consumer_group,
            "starting consumer"
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
                .arg(&samples_stream)
                .arg(&peer_stream)
                .arg(">")
                .arg(">")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(redis::Value::Nil) => continue,
                Ok(value) => {
                    for (stream, entry_id, data) in parse_stream_response(&value) {
                        if stream == samples_stream {
                            self.dispatch_samples(&data);
                        } else if stream == peer_stream {
                            self.dispatch_peer_report(&data);
                        }

                        let _: redis::RedisResult<i64> = redis::cmd("XACK")
                            .arg(&stream)
                            .arg(&self.config.consumer_group)
                            .arg(&entry_id)
                            .query_async(&mut conn)
                            .await;
                    }
                }
                Err(e) => {
                    error!("Error reading from streams: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }

        Ok(())
    }

    fn dispatch_samples(&self, data: &str) {
        let samples: Vec<FlowSample> = match serde_json::from_str(data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Failed to parse sample batch: {}", e);
                self.metrics.decode_warnings.inc();
                return;
            }
        };
        if self
            .cmd_tx
            .try_send(EngineCommand::Samples(samples))
            .is_err()
        {
            warn!("engine channel full, dropping sample batch");
            self.metrics.samples_dropped.inc();
        }
    }

    fn dispatch_peer_report(&self, data: &str) {
        // peer reports are protobuf payloads wrapped in the message tree's
        // binary-in-json sentinel
        let payload = match Msg::from_json_str(data) {
            Ok(msg) => msg.as_bytes().map(|b| b.to_vec()),
            Err(_) => None,
        };
        let payload = match payload {
            Some(p) => p,
            None => {
                warn!("peer report entry is not a binary envelope");
                self.metrics.decode_warnings.inc();
                return;
            }
        };
        if self
            .cmd_tx
            .try_send(EngineCommand::PeerReport(payload))
            .is_err()
        {
            warn!("engine channel full, dropping peer report");
        }
    }
}

/// Parse a Redis XREADGROUP response into (stream, entry id, data) triples.
///
/// Response format: `[[stream_name, [[entry_id, [field, value, ...]], ...]], ...]`
fn parse_stream_response(value: &redis::Value) -> Vec<(String, String, String)> {
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
        let stream_name = match value_to_string(&stream_data[0]) {
            Some(name) => name,
            None => continue,
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
                        entries.push((stream_name.clone(), entry_id.clone(), data));
                    }
                }
                i += 2;
            }
        }
    }

    entries
}

/// Convert a Redis Value to a String
fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk_str(s: &str) -> redis::Value {
        redis::Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_stream_response() {
        let value = redis::Value::Bulk(vec![redis::Value::Bulk(vec![
            bulk_str("skylink:flow-samples"),
            redis::Value::Bulk(vec![redis::Value::Bulk(vec![
                bulk_str("1-0"),
                redis::Value::Bulk(vec![bulk_str("data"), bulk_str("[]")]),
            ])]),
        ])]);

        let entries = parse_stream_response(&value);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "skylink:flow-samples");
        assert_eq!(entries[0].1, "1-0");
        assert_eq!(entries[0].2, "[]");
    }

    #[test]
    fn test_parse_ignores_malformed_entries() {
        let value = redis::Value::Bulk(vec![redis::Value::Int(3)]);
        assert!(parse_stream_response(&value).is_empty());
        assert!(parse_stream_response(&redis::Value::Nil).is_empty());
    }
}
