//! callwire - JSON remote procedure calls over TCP
//!
//! Server binary: loads configuration, preloads the `core` plugin and serves
//! until a `shutdown()` call or Ctrl-C.

mod plugins;

use callwire_protocol::{Framing, LogLevel};
use callwire_server::{Config, Registry, Server, ServerConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "callwire")]
#[command(about = "JSON remote procedure call server")]
#[command(version)]
struct Cli {
    /// Port to listen on (overrides the configured bind port)
    port: Option<u16>,

    /// YAML configuration file (defaults to $CALLWIRE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level (assert, error, warning, message, debug)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Message framing (single_read or lines)
    #[arg(long)]
    framing: Option<Framing>,
}

impl Cli {
    fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = match self.config {
            Some(ref path) => Config::load_from(Some(path))?,
            None => Config::load()?,
        };

        if let Some(bind) = self.bind {
            config.network.bind_addr = bind;
        }
        if let Some(port) = self.port {
            config.network.bind_addr.set_port(port);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(framing) = self.framing {
            config.network.framing = framing;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_directive())),
        )
        .init();

    if let Some(path) = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("CALLWIRE_CONFIG").map(PathBuf::from))
    {
        tracing::info!("Loaded config from {}", path.display());
    }

    tracing::info!("Starting callwire server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Framing: {}", config.network.framing);
    tracing::info!("  Read buffer: {} bytes", config.network.read_buffer_size);

    let catalog = plugins::catalog();
    tracing::info!("  Importable plugins: {}", catalog.names().join(", "));

    let registry = Registry::with_catalog(catalog);
    registry.load(&plugins::CorePlugin);

    let server = Arc::new(Server::with_registry(
        ServerConfig::from(&config),
        registry,
    ));

    // Spawn shutdown signal handler
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown.stop();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    let stats = server.stats();
    tracing::info!(
        "Server stopped ({} connections, {} requests)",
        stats
            .connections_total
            .load(std::sync::atomic::Ordering::Relaxed),
        stats.requests_total.load(std::sync::atomic::Ordering::Relaxed)
    );
    Ok(())
}
