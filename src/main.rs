use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use twin_replicator::config::Config;
use twin_replicator::engine::{PassSettings, Replicator};
use twin_replicator::service::ReplicationService;
use twin_replicator::source::InfluxDbSource;
use twin_replicator::twins::DigitalTwinsClient;

/// Command-line arguments for the twin replicator
#[derive(Parser)]
#[command(
    name = "twin-replicator",
    about = "Replicates device telemetry from InfluxDB into Azure Digital Twins",
    long_about = "Periodically discovers device twins of the configured models, reads each \
                  device's latest properties and aligned telemetry from InfluxDB, and patches \
                  the corresponding twins in Azure Digital Twins."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "replicator.toml",
        help = "Configuration file path (TOML format)"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Run a single pass and exit
    #[arg(
        long,
        help = "Run one reconciliation pass and exit; exit status 1 if it reported failures"
    )]
    once: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// The configuration file is required: it carries the endpoints.
    fn validate(&self) -> Result<(), String> {
        if !self.config.exists() {
            return Err(format!(
                "Configuration file not found: {}",
                self.config.display()
            ));
        }

        if !self.config.is_file() {
            return Err(format!(
                "Configuration path is not a file: {}",
                self.config.display()
            ));
        }

        if let Some(extension) = self.config.extension() {
            if extension != "toml" {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    self.config.display()
                );
            }
        }

        Ok(())
    }
}

/// Wire the ports into the engine and run until done
///
/// Returns the process exit status.
async fn run(cli: &Cli, config: Config) -> anyhow::Result<i32> {
    let source = InfluxDbSource::new(&config.influxdb, config.replication.property_lookback())
        .context("Failed to create InfluxDB client")?;
    let directory =
        DigitalTwinsClient::new(&config.twins).context("Failed to create Digital Twins client")?;

    let replicator = Replicator::new(
        Arc::new(source),
        Arc::new(directory),
        config.classification.clone(),
        PassSettings::from(&config.replication),
    );
    let service = ReplicationService::new(
        replicator,
        config.replication.interval(),
        config.replication.warmup(),
    );

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        handler_token.cancel();
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    if cli.once {
        let outcome = service.run_once(&token).await;
        return Ok(if outcome.is_clean() { 0 } else { 1 });
    }

    info!(
        "Replicator is running every {:?}. Press Ctrl+C to stop.",
        config.replication.interval()
    );
    service.run(&token).await;

    Ok(0)
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting twin replicator");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(&cli, config)) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    info!("Twin replicator shutdown complete");
    std::process::exit(code);
}
