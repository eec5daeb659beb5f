//! Operations and observability.
//!
//! - `telemetry` - Logging setup, log level reload, admin HTTP endpoint

pub mod telemetry;

pub use telemetry::*;
