//! meshd - unified CLI entrypoint.
//!
//! Usage:
//!   meshd start --config config/meshd.toml
//!   meshd check-config --config config/meshd.toml

use anyhow::Result;
use clap::Parser;
use meshd::cli::commands::{run_check_config, run_start};
use meshd::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::CheckConfig(args) => run_check_config(args),
    }
}
