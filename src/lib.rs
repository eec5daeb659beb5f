#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Naming: dispatch types repeat their module name (SessionError, RetryStats)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
// Documentation style
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: log lines keep positional arguments
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::format_push_string)]
// Numeric casts: millisecond and frame-length conversions
#![allow(clippy::cast_possible_truncation)]
// Callbacks and contexts are moved into closures by value
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_self)]
#![allow(clippy::unused_async)]
// Large futures: upstream dispatch futures carry their context
#![allow(clippy::large_futures)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_match_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! meshd - dispatch core of an event-mesh runtime.
//!
//! Accepts messages from TCP clients, forwards them to a message-queue backend
//! through a pluggable producer, and reports every outcome back to the
//! originating connection, retrying transient failures after a delay.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::runtime` - Main runtime orchestration
//! - `core::time` - Clock abstraction
//!
//! ## Protocol
//! - `protocol` - Command table, packages, frame codec
//!
//! ## Producer
//! - `producer` - Producer facade, backend contract, in-process backend
//!
//! ## Dispatch
//! - `dispatch::session` - Per-connection state and write-back
//! - `dispatch::upstream` - Upstream dispatch task
//! - `dispatch::retry` - Retry scheduler
//! - `dispatch::backpressure` - Per-session in-flight bound
//!
//! ## Networking
//! - `net::server` - TCP listener
//! - `net::transport` - Connection write channel
//!
//! ## Operations
//! - `ops::telemetry` - Logging and admin endpoint

// Core infrastructure
pub mod core;

// Wire protocol
pub mod protocol;

// Backend producer
pub mod producer;

// Upstream dispatch
pub mod dispatch;

// Networking
pub mod net;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, runtime, time};
pub use dispatch::{ClientGroupRegistry, Retryer, Session, UpstreamMsgContext};
pub use ops::telemetry;
pub use producer::{Producer, ProducerError, ProducerErrorKind};
