//! Producer facade and the backend contract it wraps.
//!
//! - `backend` - Backend send capability, settings, native errors
//! - `message` - Backend-agnostic message, send result, exception context
//! - `error` - Normalized producer error
//! - `facade` - `Producer`: send / oneway / async / request
//! - `memory` - In-process backend

pub mod backend;
pub mod error;
pub mod facade;
pub mod memory;
pub mod message;

pub use backend::{Backend, BackendError, BackendMessage, BackendSettings, ServiceState};
pub use error::{ProducerError, ProducerErrorKind};
pub use facade::{Producer, RequestCallback, SendCallback, SendOutcome};
pub use memory::MemoryBackend;
pub use message::{ExceptionContext, Message, SendResult};

use uuid::Uuid;

/// Client-generated unique message id.
pub fn new_unique_id() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}
