//! callwire-cli - Command-line interface for callwire
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use callwire_client::{Client, ClientConfig};
use callwire_protocol::{Framing, LogLevel, DEFAULT_PORT};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "callwire-cli")]
#[command(about = "Command-line client for callwire servers")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(default_value = "127.0.0.1", env = "CALLWIRE_HOST")]
    host: String,

    /// Server port
    #[arg(default_value_t = DEFAULT_PORT, env = "CALLWIRE_PORT")]
    port: u16,

    /// Log level (assert, error, warning, message, debug)
    #[arg(short, long, default_value = "warning")]
    log_level: LogLevel,

    /// Message framing (single_read or lines)
    #[arg(long, default_value = "single_read", env = "CALLWIRE_FRAMING")]
    framing: Framing,

    /// Response timeout in seconds (waits forever when omitted)
    #[arg(long)]
    timeout: Option<u64>,

    /// Seconds between connection attempts
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Call a single method and print the response
    Call {
        /// Method name
        method: String,

        /// Positional arguments (JSON literals; anything else is sent as a string)
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_directive())),
        )
        .init();

    let mut config = ClientConfig::new(cli.host.clone(), cli.port).with_framing(cli.framing);
    if let Some(secs) = cli.timeout {
        config = config.with_request_timeout(Duration::from_secs(secs));
    }
    let mut client = Client::new(config);
    let retry_delay = Duration::from_secs(cli.retry_delay);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, retry_delay).await?;
        }
        Some(Commands::Call { method, args }) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let invocation = commands::Invocation {
                method,
                params: commands::parse_args(&args),
            };
            tracing::debug!(
                "One-shot call {}({} args)",
                invocation.method,
                invocation.params.len()
            );
            let result = commands::execute(&mut client, invocation).await;
            client.disconnect().await;

            match result {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    tracing::debug!("One-shot call failed: {}", e);
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
