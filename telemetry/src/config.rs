//! Configuration module for the Skylink telemetry daemon

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub aggregation: AggregationConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Redis stream transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Stream carrying sampled flow counters
    #[serde(default = "default_samples_stream")]
    pub samples_stream: String,

    /// Stream carrying serialized peer flow reports
    #[serde(default = "default_peer_stream")]
    pub peer_stream: String,

    /// Stream emitted reports are published to
    #[serde(default = "default_report_stream")]
    pub report_stream: String,

    /// Consumer group name
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Consumer name
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Batch size for reading from streams
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Block timeout when reading (milliseconds)
    #[serde(default = "default_block_timeout", alias = "block_timeout_ms")]
    pub block_ms: u64,

    /// Approximate cap on the report stream length
    #[serde(default = "default_max_stream_length")]
    pub max_stream_length: usize,
}

/// Flow aggregation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Node identity stamped on reports
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default = "default_location_id")]
    pub location_id: String,

    /// Topic reports are published under
    #[serde(default = "default_report_topic")]
    pub report_topic: String,

    /// Observation window length (seconds)
    #[serde(default = "default_window_interval")]
    pub window_interval_secs: u64,

    /// Windows accumulated per emitted report
    #[serde(default = "default_num_windows")]
    pub num_windows: usize,

    /// Max flow entries per window
    #[serde(default = "default_max_reports")]
    pub max_reports_per_window: usize,

    /// Idle accumulator time to live (seconds)
    #[serde(default = "default_acc_ttl")]
    pub acc_ttl_secs: i64,

    /// "absolute" or "relative"
    #[serde(default = "default_report_type")]
    pub report_type: String,

    /// Report every L2 child flow instead of only pair aggregates
    #[serde(default = "default_true")]
    pub report_all_samples: bool,

    /// Conntrack zone to collect; 65535 collects every zone and merges
    #[serde(default)]
    pub ct_zone: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_true")]
    pub stdout: bool,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Period of the metrics summary log line (seconds)
    #[serde(default = "default_metrics_period")]
    pub log_period_secs: u64,
}

// Default value functions
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_samples_stream() -> String { "skylink:flow-samples".to_string() }
fn default_peer_stream() -> String { "skylink:peer-reports".to_string() }
fn default_report_stream() -> String { "skylink:flow-reports".to_string() }
fn default_consumer_group() -> String { "telemetry".to_string() }
fn default_consumer_name() -> String { "telemetry-1".to_string() }
fn default_batch_size() -> usize { 100 }
fn default_block_timeout() -> u64 { 1000 }
fn default_max_stream_length() -> usize { 10000 }
fn default_node_id() -> String { "node-0".to_string() }
fn default_location_id() -> String { "location-0".to_string() }
fn default_report_topic() -> String { "dev-test/flows".to_string() }
fn default_window_interval() -> u64 { 60 }
fn default_num_windows() -> usize { 1 }
fn default_max_reports() -> usize { 512 }
fn default_acc_ttl() -> i64 { 120 }
fn default_report_type() -> String { "relative".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_metrics_period() -> u64 { 60 }
fn default_true() -> bool { true }

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&content).with_context(|| "Failed to parse configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.aggregation.window_interval_secs < 1 {
            anyhow::bail!("Window interval must be at least 1 second");
        }
        if self.aggregation.num_windows < 1 {
            anyhow::bail!("At least one window per report is required");
        }
        if self.aggregation.max_reports_per_window < 1 {
            anyhow::bail!("max_reports_per_window must be at least 1");
        }
        match self.aggregation.report_type.as_str() {
            "absolute" | "relative" => {}
            other => anyhow::bail!("Unknown report_type: {}", other),
        }
        Ok(())
    }
}
