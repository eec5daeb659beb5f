//! Common test harness utilities for integration tests.
//!
//! - Session harness over a shared scripted `MemoryBackend`
//! - Minimal framed TCP client for end-to-end runs
//! - Test configurations bound to ephemeral ports

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use bytes::BytesMut;
use meshd::config::{BackendConfig, Config, DispatchConfig};
use meshd::dispatch::{ClientGroupRegistry, Session};
use meshd::net::ChannelTransport;
use meshd::producer::{Backend, MemoryBackend};
use meshd::protocol::{
    Command, Header, Package, PackageBody, PackageDecoder, PackageEncoder, UserAgent,
    WireMessage,
};
use meshd::time::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

pub const MAX_FRAME: usize = 64 * 1024;

/// One session wired to a scripted backend, with the packages it writes captured.
pub struct SessionHarness {
    pub registry: Arc<ClientGroupRegistry<SystemClock>>,
    pub backend: MemoryBackend,
    pub session: Arc<Session<SystemClock>>,
    pub written: UnboundedReceiver<Package>,
}

impl SessionHarness {
    pub fn new(dispatch: DispatchConfig) -> Self {
        let backend = MemoryBackend::new();
        let shared = backend.clone();
        let registry = Arc::new(ClientGroupRegistry::new(
            SystemClock,
            dispatch,
            BackendConfig::default(),
            Arc::new(move |_: &str| Arc::new(shared.clone()) as Arc<dyn Backend>),
        ));
        let (transport, written) = ChannelTransport::new("127.0.0.1:45000");
        let session = registry
            .open_session(UserAgent::new("5023", "orders-app"), Arc::new(transport))
            .expect("open session");
        Self {
            registry,
            backend,
            session,
            written,
        }
    }

    pub async fn send(&self, command: Command, seq: &str, message: WireMessage) {
        self.session
            .handle_upstream(
                Header::request(command, seq),
                Some(message),
                SystemClock.now(),
            )
            .await
            .expect("upstream accepted");
    }

    pub async fn next_written(&mut self) -> Package {
        tokio::time::timeout(Duration::from_secs(30), self.written.recv())
            .await
            .expect("package written in time")
            .expect("transport open")
    }
}

pub fn dispatch_config(retry_delay_ms: u64, capacity: usize) -> DispatchConfig {
    DispatchConfig {
        retry_delay_ms,
        backpressure_capacity: capacity,
        ..DispatchConfig::default()
    }
}

/// Config listening on ephemeral loopback ports.
pub fn loopback_config() -> Config {
    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".into();
    config.server.max_frame_bytes = MAX_FRAME;
    config.telemetry.admin_bind = Some("127.0.0.1:0".into());
    config
}

/// Framed client speaking the package protocol.
pub struct TestClient {
    stream: TcpStream,
    decoder: PackageDecoder,
    encoder: PackageEncoder,
    buf: BytesMut,
}

impl TestClient {
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.expect("connect"),
            decoder: PackageDecoder::new(MAX_FRAME),
            encoder: PackageEncoder::new(MAX_FRAME),
            buf: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, package: &Package) {
        let bytes = self.encoder.encode_to_bytes(package).expect("encode");
        self.stream.write_all(&bytes).await.expect("write");
    }

    pub async fn recv(&mut self) -> Option<Package> {
        loop {
            if let Some(package) = self.decoder.decode(&mut self.buf).expect("decode") {
                return Some(package);
            }
            let read = tokio::time::timeout(
                Duration::from_secs(5),
                self.stream.read_buf(&mut self.buf),
            )
            .await
            .expect("read in time")
            .expect("read");
            if read == 0 {
                return None;
            }
        }
    }

    pub async fn hello(&mut self, group: &str) -> Package {
        let hello = Package {
            header: Header::request(Command::HelloRequest, "hello-1"),
            body: Some(PackageBody::UserAgent(UserAgent::new("5023", group))),
        };
        self.send(&hello).await;
        self.recv().await.expect("hello response")
    }
}
