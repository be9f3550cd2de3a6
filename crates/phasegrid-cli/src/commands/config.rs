//! Default configuration output and configuration checking.

use anyhow::Context;
use clap::Args;
use phasegrid_config::PipelineConfig;
use std::path::PathBuf;

#[derive(Args)]
pub struct ConfigArgs {
    /// Load and validate this file instead of using the defaults
    #[arg(long, value_name = "FILE")]
    check: Option<PathBuf>,

    /// Write the configuration to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let config = match &args.check {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate().context("configuration is invalid")?;

    match &args.output {
        Some(path) => {
            config.save(path)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
