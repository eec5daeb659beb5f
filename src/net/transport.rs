use crate::protocol::Package;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {0} is closed")]
    Closed(String),
}

/// Write side of one client connection.
pub trait Transport: Send + Sync + 'static {
    fn peer(&self) -> &str;

    /// Queue `package` for the connection writer without waiting for it to hit the wire.
    fn write_and_flush(&self, package: Package) -> Result<(), TransportError>;

    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Transport handing packages to a writer task over an unbounded channel.
#[derive(Debug)]
pub struct ChannelTransport {
    peer: String,
    tx: mpsc::UnboundedSender<Package>,
    open: AtomicBool,
}

impl ChannelTransport {
    /// Returns the transport and the receiver its writer drains.
    pub fn new(peer: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Package>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peer: peer.into(),
                tx,
                open: AtomicBool::new(true),
            },
            rx,
        )
    }
}

impl Transport for ChannelTransport {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn write_and_flush(&self, package: Package) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.peer.clone()));
        }
        self.tx
            .send(package)
            .map_err(|_| TransportError::Closed(self.peer.clone()))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Header};

    #[test]
    fn writes_until_closed() {
        let (transport, mut rx) = ChannelTransport::new("127.0.0.1:5000");
        let pkg = Package::new(Header::request(Command::HeartbeatResponse, "1"));
        transport.write_and_flush(pkg.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), pkg);

        transport.close();
        assert!(!transport.is_open());
        assert_eq!(
            transport.write_and_flush(pkg),
            Err(TransportError::Closed("127.0.0.1:5000".into()))
        );
    }

    #[test]
    fn dropped_writer_closes_transport() {
        let (transport, rx) = ChannelTransport::new("peer");
        drop(rx);
        assert!(!transport.is_open());
    }
}
