use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use cbi_core::config::RootConfig;

mod catchup;
mod common;
mod delta;
mod epoch_boundary;
mod polls;
mod status;

#[derive(Debug, Subcommand)]
enum Command {
    /// Rebuild the epoch aggregates once per epoch, after the stake snapshot settles
    EpochBoundary(epoch_boundary::Args),

    /// Fold new ledger rows into the incremental cache tables
    Delta(delta::Args),

    /// Backfill a cache table over its whole id range
    Catchup(catchup::Args),

    /// Inspect on-chain stake pool polls
    #[command(subcommand)]
    Polls(polls::Command),

    /// Print epoch, watermark and lock state
    Status(status::Args),
}

#[derive(Debug, Parser)]
#[clap(name = "cbi")]
#[clap(bin_name = "cbi")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(explicit_file: &Option<PathBuf>) -> Result<RootConfig, config::ConfigError> {
    let mut s = config::Config::builder();

    // our base config will always be in /etc/cbi
    s = s.add_source(config::File::with_name("/etc/cbi/cbi.toml").required(false));

    // but we can override it by having a file in the working dir
    s = s.add_source(config::File::with_name("cbi.toml").required(false));

    // if an explicit file was passed, then we load it as mandatory
    if let Some(explicit) = explicit_file.as_ref().and_then(|x| x.to_str()) {
        s = s.add_source(config::File::with_name(explicit).required(true));
    }

    // finally, we use env vars to make some last-step overrides
    s = s.add_source(
        config::Environment::with_prefix("CBI")
            .prefix_separator("_")
            .separator("__"),
    );

    s.build()?.try_deserialize()
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = load_config(&args.config).into_diagnostic()?;

    match args.command {
        Command::EpochBoundary(x) => epoch_boundary::run(&config, &x)?,
        Command::Delta(x) => delta::run(&config, &x)?,
        Command::Catchup(x) => catchup::run(&config, &x)?,
        Command::Polls(x) => polls::run(&config, &x)?,
        Command::Status(x) => status::run(&config, &x)?,
    };

    Ok(())
}
