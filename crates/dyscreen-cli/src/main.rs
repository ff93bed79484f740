//! dyscreen CLI — serve the screening API or drive it from the shell.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dyscreen_core::model::SessionId;

mod commands;

#[derive(Parser)]
#[command(name = "dyscreen", version, about = "Dyscalculia screening service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to bind to (overrides [server] address)
        #[arg(long, env = "DYSCREEN_ADDRESS")]
        address: Option<String>,

        /// Keep all data in memory instead of the configured database
        #[arg(long)]
        in_memory: bool,
    },

    /// Start a test session and print the battery as JSON
    Start {
        /// Subject of the test taker (registered if unknown)
        #[arg(long)]
        user: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Grade a submission for a session
    Submit {
        /// Session id returned by `start`
        #[arg(long)]
        session: SessionId,

        /// Subject of the session owner
        #[arg(long)]
        user: String,

        /// JSON file with per-subtest answers and performance data
        #[arg(long)]
        answers: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show a user's past sessions
    History {
        /// Subject of the test taker
        #[arg(long)]
        user: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Import questions into the bank
    Seed {
        /// JSON array of bank entries
        #[arg(long)]
        file: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List available models
    ListModels {
        /// Filter to specific provider
        #[arg(long)]
        provider: Option<String>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and seed bank
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dyscreen=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            config,
            address,
            in_memory,
        } => commands::serve::execute(config, address, in_memory).await,
        Commands::Start { user, config } => commands::start::execute(user, config).await,
        Commands::Submit {
            session,
            user,
            answers,
            config,
        } => commands::submit::execute(session, user, answers, config).await,
        Commands::History { user, config } => commands::history::execute(user, config).await,
        Commands::Seed { file, config } => commands::seed::execute(file, config).await,
        Commands::ListModels { provider, config } => {
            commands::list_models::execute(provider, config)
        }
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
