//! rws-proxy: inverse signalling proxy for WebRTC media sources.
//!
//! Sources register at the back port under a configured name; viewers
//! connect on the front port and reach a source by URI. The proxy bridges
//! the two RTSP-over-WebSocket dialogues so SDP and ICE flow between them
//! while media runs peer-to-peer.

mod back;
mod config;
mod forward;
mod front;
mod server;

use clap::Parser;
use config::ProxyConfig;
use server::ProxyServer;
use std::path::PathBuf;
use tracing::{error, info};

/// rws-proxy — WebRTC signalling rendezvous
#[derive(Parser, Debug)]
#[command(name = "rws-proxy", version, about = "Inverse signalling proxy for WebRTC media sources")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "rws-proxy.toml")]
    config: PathBuf,

    /// Viewer-facing listen port
    #[arg(long)]
    front_port: Option<u16>,

    /// Source-facing listen port
    #[arg(long)]
    back_port: Option<u16>,

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

    info!(version = env!("CARGO_PKG_VERSION"), "starting rws-proxy");

    let config = match ProxyConfig::load(Some(&cli.config), cli.front_port, cli.back_port) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load config");
            std::process::exit(1);
        }
    };
    if config.back_auth_tokens.is_empty() {
        info!("no [auth] entries configured, no source will be admitted");
    }

    let proxy = ProxyServer::new(config);

    tokio::select! {
        result = proxy.run() => {
            if let Err(err) = result {
                error!(error = %err, "proxy error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("rws-proxy stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
