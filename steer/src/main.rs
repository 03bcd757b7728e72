//! Skylink Steer - Station Steering Service
//!
//! Consumes driver and stats events, runs the per-station policy stacks and
//! publishes steering directives.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skylink_steer::config::Config;
use skylink_steer::pipeline::Pipeline;

/// Skylink Steering Service
#[derive(Parser, Debug)]
#[command(name = "skylink-steer")]
#[command(author = "Skylink Networks")]
#[command(version)]
#[command(about = "Drives station steering policy stacks", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/skylink/steer.toml")]
    config: PathBuf,

    /// Run in debug mode (verbose logging)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    config.validate()?;

    setup_logging(&config, args.debug)?;

    info!("Skylink Steer starting...");
    info!("Redis: {}", config.redis.url);
    info!("Stations: {}", config.stations.len());

    let pipeline = Arc::new(Pipeline::new(config));

    let pipeline_shutdown = Arc::clone(&pipeline);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        pipeline_shutdown.shutdown();
    })
    .context("Failed to set Ctrl+C handler")?;

    pipeline.run().await?;

    info!("Skylink Steer stopped");
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
        .add_directive(format!("skylink_steer={}", level).parse()?)
        .add_directive("redis=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }

    Ok(())
}
