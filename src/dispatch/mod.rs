//! Upstream dispatch: client packages to backend sends and acknowledgments back.
//!
//! - `backpressure` - Per-session bound on in-flight sends
//! - `retry` - Delay queue re-running failed attempts
//! - `upstream` - One request coupled to one send attempt
//! - `session` - Per-connection state, validation, write-back
//! - `group` - Producer and scheduler shared by a client group

pub mod backpressure;
pub mod error;
pub mod group;
pub mod retry;
pub mod session;
pub mod upstream;

pub use backpressure::{UpstreamBuffer, UpstreamPermit};
pub use error::SessionError;
pub use group::{BackendFactory, ClientGroup, ClientGroupRegistry};
pub use retry::{PendingRetry, RetryContext, RetryDecision, RetryStats, RetryTask, Retryer};
pub use session::{Session, SessionState, SessionStats};
pub use upstream::UpstreamMsgContext;
