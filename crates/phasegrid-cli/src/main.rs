//! phasegrid CLI - cardiac phase projection of fMRI data.

mod commands;
mod metadata;
mod motion;
mod pipeline;
mod progress;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phasegrid")]
#[command(author, version, about = "Cardiac phase projection of fMRI data", long_about = None)]
struct Cli {
    /// Log debug detail (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the cardiac waveform and project a 4-D series onto cardiac phase
    Run(commands::run::RunArgs),

    /// Rank cross-correlation peaks of every voxel by mutual information
    Peaks(commands::peaks::PeaksArgs),

    /// Print or write the default pipeline configuration
    Config(commands::config::ConfigArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Peaks(args) => commands::peaks::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
