//! meshd CLI.
//!
//! - `meshd start` - Start the dispatch daemon
//! - `meshd check-config` - Validate a configuration file

mod args;
pub mod commands;

pub use args::{CheckConfigArgs, Cli, Commands, StartArgs};
