//! Forwarder agent CLI
//!
//! Deploys a sweep agent, binds its destination once, and flushes native and
//! token balances to it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use sweep_forwarder::cli::commands;
use sweep_forwarder::config::Config;

/// Sweep agent forwarding all funds to one destination
#[derive(Parser)]
#[command(name = "forwarder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "forwarder.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the agent
    Deploy {
        /// Destination address (default: agent.destination, empty = unbound)
        #[arg(long)]
        destination: Option<String>,
    },

    /// Bind the destination (only once)
    Init {
        /// Destination address
        destination: String,
    },

    /// Send native currency to the agent (local ledger)
    Fund {
        /// Amount in base units
        amount: u64,
    },

    /// Credit tokens to the agent (local ledger)
    Mint {
        /// Token mint address
        token: String,

        /// Amount in base units
        amount: u64,
    },

    /// Make an address refuse native transfers (local ledger)
    Reject {
        /// Account address
        address: String,

        /// Accept transfers again
        #[arg(long)]
        clear: bool,
    },

    /// Sweep the whole native balance to the destination
    FlushEth {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        /// Simulate only, don't execute
        #[arg(long)]
        dry_run: bool,
    },

    /// Sweep the whole balance of a token to the destination
    FlushErc20 {
        /// Token mint address
        token: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        /// Simulate only, don't execute
        #[arg(long)]
        dry_run: bool,
    },

    /// Show agent, destination and balances
    Status,

    /// Show emitted events
    Events {
        /// Number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sweep_forwarder=info".parse()?),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Deploy { destination } => commands::deploy(&config, destination).await,
        Commands::Init { destination } => commands::init(&config, &destination).await,
        Commands::Fund { amount } => commands::fund(&config, amount).await,
        Commands::Mint { token, amount } => commands::mint(&config, &token, amount).await,
        Commands::Reject { address, clear } => commands::reject(&config, &address, clear).await,
        Commands::FlushEth { force, dry_run } => {
            commands::flush_eth(&config, force, dry_run).await
        }
        Commands::FlushErc20 {
            token,
            force,
            dry_run,
        } => commands::flush_erc20(&config, &token, force, dry_run).await,
        Commands::Status => commands::status(&config).await,
        Commands::Events { limit } => commands::events(&config, limit).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
