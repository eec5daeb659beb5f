//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// meshd - event-mesh dispatch daemon.
#[derive(Parser)]
#[command(name = "meshd")]
#[command(version)]
#[command(about = "Event-mesh dispatch daemon: TCP clients in, backend producer out")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the dispatch daemon
    Start(StartArgs),

    /// Load and validate a configuration file, then print the effective values
    CheckConfig(CheckConfigArgs),
}

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/meshd.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/meshd.toml")]
    pub config: PathBuf,
}
