// Operator CLI for a local, hash-verified block store

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera - content-addressed block store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Name whose hash identifies the owner of writes and pins
    #[arg(long, global = true, default_value = "local")]
    owner: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Store files as blocks and print their keys
    Put {
        /// Files to store
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Store as raw blocks instead of structured (CBOR) blocks
        #[arg(long)]
        raw: bool,

        /// Pin each stored block
        #[arg(long)]
        pin: bool,
    },

    /// Fetch a block by key
    Get {
        /// Block key (hex)
        key: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show capacity and block counts
    Stat,

    /// Pin a block and everything it links to
    Pin {
        /// Block key (hex)
        key: String,
    },

    /// Remove a pin
    Unpin {
        /// Block key (hex)
        key: String,
    },

    /// List the keys a structured block links to
    Links {
        /// Block key (hex)
        key: String,
    },

    /// Delete blocks that are neither pinned nor reachable from a pin
    Gc,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = commands::open_store(cli.config.as_deref()).await?;
    let owner = commands::owner(&cli.owner);

    match cli.command {
        Commands::Put { files, raw, pin } => {
            commands::blocks::put(&store, &owner, &files, raw, pin).await?;
        }
        Commands::Get { key, output } => {
            commands::blocks::get(&store, &key, output.as_deref()).await?;
        }
        Commands::Stat => {
            commands::status::show(&store, &owner).await?;
        }
        Commands::Pin { key } => {
            commands::pins::pin(&store, &owner, &key).await?;
        }
        Commands::Unpin { key } => {
            commands::pins::unpin(&store, &owner, &key).await?;
        }
        Commands::Links { key } => {
            commands::blocks::links(&store, &key).await?;
        }
        Commands::Gc => {
            commands::pins::gc(&store).await?;
        }
    }

    Ok(())
}
