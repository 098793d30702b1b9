//! voxrun CLI
//!
//! Command-line interface for running containerized inference jobs.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use voxrun_core::VoxrunConfig;

/// voxrun - run packaged medical-image models in containers
#[derive(Parser, Debug)]
#[command(name = "voxrun")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "VOXRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the container runtime and daemon
    Check,

    /// Make a model image available locally
    Pull {
        /// Image reference or catalog model name
        image: String,
    },

    /// List models in the local catalog
    Models,

    /// Run a model on input volumes
    Run(commands::RunArgs),
}

fn init_logging(config: &VoxrunConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if config.logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => VoxrunConfig::from_file(path)?,
        None => VoxrunConfig::default(),
    };
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Check => {
            commands::check(&config).await?;
        }
        Commands::Pull { image } => {
            commands::pull(&config, image).await?;
        }
        Commands::Models => {
            commands::models(&config)?;
        }
        Commands::Run(args) => {
            commands::run(&config, args).await?;
        }
    }

    Ok(())
}
