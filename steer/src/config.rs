//! Configuration module for the Skylink steering daemon

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::candidate::Preference;
use crate::policy::snr_level::SnrLevelMode;
use crate::policy::Band;
use crate::MacAddr;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Stations under steering control
    #[serde(default, rename = "station")]
    pub stations: Vec<StationConfig>,
    pub logging: LoggingConfig,
}

/// Redis stream transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Stream carrying driver/state events
    #[serde(default = "default_events_stream")]
    pub events_stream: String,

    /// Stream steering directives are published to
    #[serde(default = "default_commands_stream")]
    pub commands_stream: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_block_timeout", alias = "block_timeout_ms")]
    pub block_ms: u64,

    #[serde(default = "default_max_stream_length")]
    pub max_stream_length: usize,
}

/// Steering engine cadence
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Timer tick period (milliseconds)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_ms: default_tick_ms(),
        }
    }
}

/// One steered station and its policy stack, in stack order:
/// band filter, channel capability, BTM response, SNR level.
#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub mac: MacAddr,

    /// Candidate BSSes for this station
    #[serde(default, rename = "candidate")]
    pub candidates: Vec<CandidateConfig>,

    #[serde(default)]
    pub band_filter: Option<BandFilterSection>,

    #[serde(default = "default_true")]
    pub chan_cap: bool,

    #[serde(default = "default_true")]
    pub btm_response: bool,

    #[serde(default)]
    pub snr_level: Option<SnrLevelSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateConfig {
    pub bssid: MacAddr,
    pub freq_mhz: u32,
    #[serde(default = "default_width")]
    pub width_mhz: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BandFilterSection {
    #[serde(default)]
    pub bands: Vec<Band>,
    #[serde(default)]
    pub included_preference: Option<Preference>,
    #[serde(default)]
    pub excluded_preference: Option<Preference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnrLevelSection {
    pub mode: SnrLevelMode,
    #[serde(default)]
    pub threshold_snr: Option<u32>,
    #[serde(default)]
    pub threshold_bytes: Option<u64>,
    #[serde(default)]
    pub from_bssids: Vec<MacAddr>,
    #[serde(default)]
    pub to_bssids: Vec<MacAddr>,
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

// Default value functions
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_events_stream() -> String { "skylink:steer-events".to_string() }
fn default_commands_stream() -> String { "skylink:steer-commands".to_string() }
fn default_consumer_group() -> String { "steer".to_string() }
fn default_consumer_name() -> String { "steer-1".to_string() }
fn default_batch_size() -> usize { 100 }
fn default_block_timeout() -> u64 { 1000 }
fn default_max_stream_length() -> usize { 10000 }
fn default_tick_ms() -> u64 { 1000 }
fn default_width() -> u32 { 20 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
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
        if self.engine.tick_ms < 100 {
            anyhow::bail!("Engine tick must be at least 100 ms");
        }
        for station in &self.stations {
            if station.candidates.is_empty() {
                anyhow::bail!("Station {} has no candidates", station.mac);
            }
            if let Some(snr) = &station.snr_level {
                if snr.from_bssids.is_empty() {
                    anyhow::bail!("Station {} snr_level has no from_bssids", station.mac);
                }
            }
        }
        Ok(())
    }
}
