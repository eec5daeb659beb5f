//! CLI command implementations.

mod check_config;
mod start;

pub use check_config::{describe_config, run_check_config};
pub use start::run_start;
