//! Check-config command - validates a configuration file without starting anything.

use crate::cli::args::CheckConfigArgs;
use crate::config::Config;
use anyhow::{Context, Result};

pub fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", args.config.display()))?;
    println!("{}: ok", args.config.display());
    print!("{}", describe_config(&config));
    Ok(())
}

/// Effective values, one `key = value` per line.
pub fn describe_config(config: &Config) -> String {
    let mut out = String::new();
    out.push_str(&format!("server.bind = {}\n", config.server.bind));
    out.push_str(&format!(
        "server.max_frame_bytes = {}\n",
        config.server.max_frame_bytes
    ));
    out.push_str(&format!(
        "dispatch.retry_delay_ms = {}\n",
        config.dispatch.retry_delay_ms
    ));
    out.push_str(&format!(
        "dispatch.backpressure_capacity = {}\n",
        config.dispatch.backpressure_capacity
    ));
    out.push_str(&format!(
        "dispatch.max_retries = {}\n",
        config.dispatch.max_retries
    ));
    out.push_str(&format!(
        "dispatch.request_timeout_ms = {}\n",
        config.dispatch.request_timeout_ms
    ));
    out.push_str(&format!("backend.kind = {:?}\n", config.backend.kind));
    out.push_str(&format!(
        "backend.producer_group = {}\n",
        config.backend.producer_group
    ));
    out.push_str(&format!(
        "telemetry.admin_bind = {}\n",
        config.telemetry.admin_bind.as_deref().unwrap_or("disabled")
    ));
    out
}
