//! deskpilot CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write the default config file
//! - `chat`: Interactive chat or single-message mode
//! - `serve`: Start the HTTP gateway
//! - `doctor`: Check configuration and credentials

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "deskpilot",
    about = "deskpilot — customer-support conversation dispatcher",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write ~/.deskpilot/config.toml with defaults
    Init,

    /// Chat with the dispatcher
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Print events and reply tokens as they arrive
        #[arg(long)]
        stream: bool,

        /// Run actions against the in-process mock store instead of API_URL
        #[arg(long)]
        mock_backend: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Run actions against the in-process mock store instead of API_URL
        #[arg(long)]
        mock_backend: bool,
    },

    /// Check configuration, credentials and storage
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Chat {
            message,
            session,
            stream,
            mock_backend,
        } => commands::chat::run(message, session, stream, mock_backend).await?,
        Commands::Serve { port, mock_backend } => commands::serve::run(port, mock_backend).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
