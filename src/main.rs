//! bingohall server binary
//!
//! Loads configuration, starts the engine (recovering unfinished games),
//! and serves the HTTP/WebSocket API until Ctrl+C or SIGTERM.

use bingohall::{api::ApiServer, config::ConfigLoader, factory::EngineFactory};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bingohall")]
#[command(about = "Real-time multiplayer bingo engine", long_about = None)]
struct Args {
    /// TOML configuration file; production defaults when omitted
    #[arg(long)]
    config: Option<String>,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Database directory
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.storage.data_directory = dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_filter)),
        )
        .init();

    info!(
        data_dir = %config.storage.data_directory,
        draw_interval_ms = config.game.draw_interval_ms,
        purchase_window_ms = config.game.purchase_window_ms,
        "Starting bingohall"
    );

    let api_config = config.api.clone();
    let engine = EngineFactory::create_engine(config).await?;

    if api_config.enabled {
        ApiServer::new(api_config, engine.controller.clone())
            .run(shutdown_signal())
            .await?;
    } else {
        info!("API disabled, running engine until shutdown signal");
        shutdown_signal().await;
    }

    engine.shutdown().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
