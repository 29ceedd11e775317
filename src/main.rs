//! titan gateway server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client (TLS, optional client cert)
//!         │
//!         ▼
//!   ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────┐
//!   │ listener │──▶│ connection │──▶│ auth gate │──▶│   routing    │
//!   │ + TLS    │   │ frame loop │   │ (unauth.) │   │  pipeline    │
//!   └──────────┘   └────────────┘   └─────┬─────┘   └──────────────┘
//!                   ping / close          │
//!                   handled here          ▼
//!                                 store · tokens · Google
//! ```

use std::path::PathBuf;

use clap::Parser;

use titan::config::{load_config, validate_log_level, TitanConfig};
use titan::lifecycle::{self, shutdown_signal, Shutdown};
use titan::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "titan")]
#[command(about = "TLS message gateway with session authentication", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "titan.toml")]
    config: PathBuf,

    /// Override the configured log level.
    #[arg(long, value_parser = validate_log_level)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config: TitanConfig = load_config(&args.config)?;
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }
    logging::init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "titan starting");
    tracing::info!(
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_frame_size = config.protocol.max_frame_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let started = lifecycle::start(&config).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = tokio::spawn(started.server.run(server_shutdown));

    shutdown_signal().await;
    shutdown.trigger();
    server.await??;

    started.store.save_to_file()?;
    tracing::info!("Shutdown complete");
    Ok(())
}
