//! Skylink Telemetry - Flow Metadata Aggregation Service
//!
//! Consumes sampled flow counters and peer enrichment reports, aggregates
//! them into windowed flow reports and publishes them.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skylink_telemetry::config::Config;
use skylink_telemetry::pipeline::Pipeline;

/// Skylink Telemetry Service
#[derive(Parser, Debug)]
#[command(name = "skylink-telemetry")]
#[command(author = "Skylink Networks")]
#[command(version)]
#[command(about = "Aggregates flow metadata into windowed reports", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/skylink/telemetry.toml")]
    config: PathBuf,

    /// Run in debug mode (verbose logging)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    config.validate()?;

    // Setup logging
    setup_logging(&config, args.debug)?;

    info!("Skylink Telemetry starting...");
    info!("Redis: {}", config.redis.url);
    info!(
        "Node: {} ({})",
        config.aggregation.node_id, config.aggregation.location_id
    );

    // Create the pipeline
    let pipeline = Arc::new(Pipeline::new(config).with_context(|| "Failed to initialize pipeline")?);

    // Setup signal handling
    let pipeline_shutdown = Arc::clone(&pipeline);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        pipeline_shutdown.shutdown();
    })
    .context("Failed to set Ctrl+C handler")?;

    // Run the pipeline
    pipeline.run().await?;

    info!("Skylink Telemetry stopped");
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(config: &Config, debug: bool) -> Result<()> {
    let level = if debug {
        Level::DEBUG
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("skylink_telemetry={}", level).parse()?)
        .add_directive("redis=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }

    Ok(())
}
