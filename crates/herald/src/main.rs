mod commands;

use std::net::IpAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use herald::config::DEFAULT_CONFIG_FILE;

// ============================================================================
// CLI Types
// ============================================================================

/// Herald - outbound message-delivery gateway in front of a single messaging session
#[derive(Parser, Debug)]
#[command(version = herald::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the HTTP server
    Serve {
        #[command(subcommand)]
        action: Option<ServeAction>,

        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
        config: String,

        /// Host to bind to (overrides config file)
        #[arg(long, global = true)]
        host: Option<IpAddr>,

        /// Port to listen on (overrides config file)
        #[arg(short, long, global = true)]
        port: Option<u16>,
    },

    /// Show session phase and queue statistics of a running server
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Port of the running server (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Connect to a specific server URL instead of localhost
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Submit a message through a running server
    Send {
        /// Message title (rendered in bold)
        #[arg(long)]
        title: String,

        /// Message body
        #[arg(short, long)]
        message: String,

        /// Recipient (defaults to the server's admin recipient)
        #[arg(long)]
        to: Option<String>,

        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Port of the running server (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Connect to a specific server URL instead of localhost
        #[arg(short, long)]
        server: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ServeAction {
    /// Stop a running server
    Stop,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            action,
            config,
            host,
            port,
        } => match action {
            Some(ServeAction::Stop) => commands::serve::stop(&config, port).await,
            None => commands::serve::run(&config, host, port).await,
        },
        Commands::Status {
            config,
            port,
            server,
        } => commands::status::run(&config, port, server.as_deref()).await,
        Commands::Send {
            title,
            message,
            to,
            config,
            port,
            server,
        } => {
            let message = commands::send::OutgoingMessage { title, message, to };
            commands::send::run(message, &config, port, server.as_deref()).await
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
