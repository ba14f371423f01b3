//! Main entry point for the partitioned simulation runner
//!
//! Loads configuration, sets up logging and runs a simulation against the
//! in-process kinematic backend until it finishes or is interrupted.

mod cli;
mod config;
mod signals;
mod simulation;

use anyhow::{anyhow, Context};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use simulation::Simulation;

// ============================================================================
// Logging Setup
// ============================================================================

/// Initialize logging system
fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()?;
    }

    info!("Logging initialized with level: {}", log_level);
    Ok(())
}

// ============================================================================
// Entry Point
// ============================================================================

async fn load_config(args: &CliArgs) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .context("loading configuration")?;
    config.apply_cli(args);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = load_config(&args).await?;
    setup_logging(&config.logging)?;

    info!(
        "Large Sim v{} | config: {} | location: {}",
        env!("CARGO_PKG_VERSION"),
        args.config_path.display(),
        config.simulation.location
    );

    let output = config.output_path();
    let simulation = Simulation::new(config);
    let shutdown = async {
        match signals::shutdown_signal().await {
            Ok(name) => info!("Received {} signal, stopping", name),
            Err(e) => {
                warn!("Signal handling unavailable: {:#}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let state = match simulation.run(shutdown).await {
        Ok(state) => state,
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            return Err(e);
        }
    };

    if let Some(path) = output {
        state.save(&path).await?;
    }

    info!("Done after {} steps", state.step);
    Ok(())
}
