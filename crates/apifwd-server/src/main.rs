//! apifwd-server: API forwarding relay.
//!
//! Accepts WebSocket connections, pairs a `frontend` with a `client` that
//! present the same pairing key, and forwards request/response messages
//! between them.

mod config;
mod connection;
mod handler;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// apifwd-server: pairing WebSocket relay
#[derive(Parser, Debug)]
#[command(name = "apifwd-server", version, about = "Pairing WebSocket relay")]
struct Cli {
    /// Listen port (overrides PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.apifwd/config.toml")]
    config: String,

    /// Largest accepted frame, in bytes
    #[arg(long)]
    max_frame_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting apifwd-server");

    let config_path = PathBuf::from(&cli.config);
    let env_port = std::env::var("PORT").ok();
    let server_config = match ServerConfig::load(
        Some(&config_path),
        env_port.as_deref(),
        CliOverrides {
            port: cli.port,
            bind: cli.bind.clone(),
            max_frame_size: cli.max_frame_size,
            log_level: Some(cli.log_level.clone()),
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    info!(
        bind = %server_config.bind,
        port = server_config.port,
        log_level = %server_config.log_level,
        "configuration loaded"
    );

    let handle = match RelayServer::new(server_config).start().await {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    info!(addr = %handle.local_addr(), "waiting for peers");

    shutdown_signal().await;
    info!("received shutdown signal");

    handle.stop().await;
    info!("apifwd-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
