use crate::producer::ProducerError;
use crate::protocol::Command;
use thiserror::Error;

/// Failures on the client-session side of the dispatch path.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(String),
    #[error("upstream buffer closed")]
    BufferClosed,
    #[error("command {0} is not an upstream command")]
    UnsupportedCommand(Command),
    #[error("{0} carries no message body")]
    MissingMessage(Command),
    #[error(transparent)]
    Producer(#[from] ProducerError),
}
