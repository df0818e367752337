//! rws-client: standalone source and viewer for the signalling proxy.

use clap::{Parser, Subcommand};
use rws_client::{source, viewer};
use tracing::error;

/// rws-client — source and viewer endpoints
#[derive(Parser, Debug)]
#[command(name = "rws-client", version, about = "Source and viewer endpoints for rws-proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a media source at the rendezvous and serve streams
    Source {
        /// Rendezvous host
        #[arg(long, default_value = "localhost")]
        server: String,

        /// Rendezvous back port
        #[arg(long, default_value_t = 4002)]
        port: u16,

        /// Source name to register under
        #[arg(long)]
        name: String,

        /// Pre-shared token for the name
        #[arg(long)]
        token: String,

        /// Stream path to serve (repeatable)
        #[arg(long = "stream", default_values_t = ["bars".to_string()])]
        streams: Vec<String>,
    },

    /// Play a stream through the rendezvous
    View {
        /// Rendezvous host
        #[arg(long, default_value = "localhost")]
        server: String,

        /// Rendezvous front port
        #[arg(long, default_value_t = 4001)]
        port: u16,

        /// Stream to play, as "<source>/<stream>"
        #[arg(long, default_value = "source1/bars")]
        url: String,

        /// ICE server URI (repeatable)
        #[arg(long = "ice-server")]
        ice_servers: Vec<String>,
    },
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

    match cli.command {
        Command::Source {
            server,
            port,
            name,
            token,
            streams,
        } => {
            source::run_source(source::SourceConfig {
                server,
                port,
                name,
                token,
                streams,
            })
            .await
        }
        Command::View {
            server,
            port,
            url,
            ice_servers,
        } => {
            if let Err(err) = viewer::run_viewer(viewer::ViewerConfig {
                server,
                port,
                url,
                ice_servers,
            })
            .await
            {
                error!(error = %err, "viewer failed");
                std::process::exit(1);
            }
        }
    }
}
