//! Tessera display server
//!
//! Composites client windows onto the frame buffer and serves the client
//! protocol on a Unix socket.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tessera::app::TesseraApp;
use tessera::config::Config;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Embedded display server with a software compositor")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/tessera/config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Socket path, overriding the configuration and $TESSERA_SOCKET
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Composite into memory instead of the frame buffer device
    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tessera=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Everything runs on one thread; the server state is never shared
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting Tessera display server");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let socket = cli
        .socket
        .or_else(|| config.server.socket.clone())
        .unwrap_or_else(tessera_proto::socket_path);

    // Setup signal handlers for graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                }
            }
            let _ = shutdown_tx.send(()).await;
        });
    }

    let app = TesseraApp::new(config, socket, cli.headless).await?;
    if let Err(e) = app.run(shutdown_rx).await {
        error!("Application error: {}", e);
        return Err(e);
    }
    info!("Tessera stopped");
    Ok(())
}
