//! Networking layer.
//!
//! - `transport` - Write side of a client connection
//! - `server` - TCP listener and per-connection read/write loops

pub mod server;
pub mod transport;

pub use server::MeshServer;
pub use transport::{ChannelTransport, Transport, TransportError};
