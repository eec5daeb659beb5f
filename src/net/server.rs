//! Client-facing TCP server.
//!
//! Each connection gets a read loop and a writer task. The read loop decodes
//! packages, answers session-control commands itself, and hands everything else to
//! the connection's [`Session`]. The writer drains the connection's
//! [`ChannelTransport`] so completion callbacks never touch the socket.

use super::transport::{ChannelTransport, Transport};
use crate::dispatch::{ClientGroupRegistry, Session};
use crate::protocol::{
    CodecError, Command, Header, OpStatus, Package, PackageBody, PackageDecoder,
    PackageEncoder,
};
use crate::time::Clock;
use anyhow::{Context, Result};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// What the read loop does after a package.
enum ConnAction {
    Continue,
    Close,
}

pub struct MeshServer<C: Clock> {
    registry: Arc<ClientGroupRegistry<C>>,
    clock: C,
    max_frame_bytes: usize,
    sessions: Mutex<HashMap<String, Arc<Session<C>>>>,
}

impl<C: Clock> MeshServer<C> {
    pub fn new(registry: Arc<ClientGroupRegistry<C>>, clock: C, max_frame_bytes: usize) -> Self {
        Self {
            registry,
            clock,
            max_frame_bytes,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ClientGroupRegistry<C>> {
        &self.registry
    }

    /// Live sessions keyed by peer address.
    pub fn sessions(&self) -> Vec<Arc<Session<C>>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Bind `bind` and spawn the accept loop. Returns the bound address.
    pub async fn start(
        self: &Arc<Self>,
        bind: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("failed to bind TCP listener on {}", bind))?;
        let local = listener
            .local_addr()
            .context("failed to read listener address")?;
        tracing::info!("TCP listener bound on {}", local);
        let server = Arc::clone(self);
        let handle = tokio::spawn(async move { server.accept_loop(listener, shutdown).await });
        Ok((local, handle))
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let (stream, peer) = tokio::select! {
                res = listener.accept() => match res {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!("tcp accept error: {err:?}");
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };
            if *shutdown.borrow() {
                break;
            }
            let server = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream, peer, shutdown).await {
                    tracing::warn!("connection {} ended with error: {err:?}", peer);
                }
            });
        }
        tracing::info!("TCP listener stopped");
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let _ = stream.set_nodelay(true);
        let (mut reader, writer) = stream.into_split();
        let peer_key = peer.to_string();
        let (transport, outbound) = ChannelTransport::new(peer_key.clone());
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (close_tx, close_rx) = oneshot::channel();
        let writer_task = tokio::spawn(write_loop(
            writer,
            outbound,
            close_rx,
            PackageEncoder::new(self.max_frame_bytes),
        ));
        tracing::info!("accepted client connection {}", peer);

        let mut decoder = PackageDecoder::new(self.max_frame_bytes);
        let mut buf = BytesMut::with_capacity(8 * 1024);
        let mut session: Option<Arc<Session<C>>> = None;
        let result: Result<()> = async {
            loop {
                loop {
                    let package = match decoder.decode(&mut buf)? {
                        Some(package) => package,
                        None => break,
                    };
                    // Upstream handling can wait on backpressure; shutdown must not.
                    let action = tokio::select! {
                        action = self.on_package(package, &transport, &mut session) => action,
                        _ = shutdown.changed() => {
                            say_goodbye(&transport);
                            return Ok(());
                        }
                    };
                    if let ConnAction::Close = action {
                        return Ok(());
                    }
                }
                let read = tokio::select! {
                    res = reader.read_buf(&mut buf) => res.context("read from client")?,
                    _ = shutdown.changed() => {
                        say_goodbye(&transport);
                        return Ok(());
                    }
                };
                if read == 0 {
                    return Ok(());
                }
            }
        }
        .await;

        if let Some(session) = session.take() {
            self.sessions.lock().remove(&peer_key);
            self.registry.close_session(&session);
        } else {
            transport.close();
        }
        let _ = close_tx.send(());
        if let Err(err) = writer_task.await {
            tracing::warn!("writer task for {} failed: {err:?}", peer);
        }
        tracing::info!("client connection {} closed", peer);
        result
    }

    async fn on_package(
        &self,
        package: Package,
        transport: &Arc<dyn Transport>,
        session: &mut Option<Arc<Session<C>>>,
    ) -> ConnAction {
        let start_time = self.clock.now();
        let Package { header, body } = package;
        let seq = header.seq.clone();
        match (header.command, session.as_ref()) {
            (Command::HelloRequest, None) => {
                let agent = match body {
                    Some(PackageBody::UserAgent(agent)) if !agent.group.is_empty() => agent,
                    _ => {
                        reply(
                            transport,
                            Command::HelloResponse,
                            OpStatus::Fail,
                            "hello requires a user agent with a group",
                            &seq,
                        );
                        return ConnAction::Close;
                    }
                };
                match self.registry.open_session(agent, Arc::clone(transport)) {
                    Ok(opened) => {
                        self.sessions
                            .lock()
                            .insert(transport.peer().to_string(), Arc::clone(&opened));
                        *session = Some(opened);
                        reply(
                            transport,
                            Command::HelloResponse,
                            OpStatus::Success,
                            OpStatus::Success.desc(),
                            &seq,
                        );
                        ConnAction::Continue
                    }
                    Err(err) => {
                        tracing::error!("failed to open session for {}: {}", transport.peer(), err);
                        reply(
                            transport,
                            Command::HelloResponse,
                            OpStatus::Fail,
                            &err.to_string(),
                            &seq,
                        );
                        ConnAction::Close
                    }
                }
            }
            (Command::HelloRequest, Some(_)) => {
                reply(
                    transport,
                    Command::HelloResponse,
                    OpStatus::Fail,
                    "session already established",
                    &seq,
                );
                ConnAction::Continue
            }
            (_, None) => {
                tracing::warn!(
                    "{} sent {} before hello, closing connection",
                    transport.peer(),
                    header.command
                );
                ConnAction::Close
            }
            (Command::HeartbeatRequest, Some(_)) => {
                reply(
                    transport,
                    Command::HeartbeatResponse,
                    OpStatus::Success,
                    OpStatus::Success.desc(),
                    &seq,
                );
                ConnAction::Continue
            }
            (Command::ClientGoodbyeRequest, Some(_)) => {
                reply(
                    transport,
                    Command::ClientGoodbyeResponse,
                    OpStatus::Success,
                    OpStatus::Success.desc(),
                    &seq,
                );
                ConnAction::Close
            }
            (_, Some(session)) => {
                let message = match body {
                    Some(PackageBody::Message(message)) => Some(message),
                    _ => None,
                };
                if let Err(err) = session.handle_upstream(header, message, start_time).await {
                    tracing::debug!("upstream package from {} rejected: {}", transport.peer(), err);
                }
                ConnAction::Continue
            }
        }
    }
}

fn reply(
    transport: &Arc<dyn Transport>,
    command: Command,
    status: OpStatus,
    desc: &str,
    seq: &str,
) {
    let header = Header::ack_with_desc(command, status, desc, seq);
    if let Err(err) = transport.write_and_flush(Package::new(header)) {
        tracing::warn!("failed to write {}: {}", command, err);
    }
}

fn say_goodbye(transport: &Arc<dyn Transport>) {
    let goodbye = Header::request(Command::ServerGoodbyeRequest, "");
    if let Err(err) = transport.write_and_flush(Package::new(goodbye)) {
        tracing::warn!("failed to write goodbye to {}: {}", transport.peer(), err);
    }
}

/// Replacement for a package whose encoding exceeds the frame bound: same command and
/// seq, FAIL status, no body.
fn header_only_failure(package: &Package, err: &CodecError) -> Package {
    Package::new(Header::ack_with_desc(
        package.header.command,
        OpStatus::Fail,
        err.to_string(),
        package.header.seq.clone(),
    ))
}

/// Drain queued packages onto the socket until the connection is closed, then flush
/// whatever is still queued.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Package>,
    mut closed: oneshot::Receiver<()>,
    encoder: PackageEncoder,
) {
    let mut buf = BytesMut::new();
    loop {
        let package = tokio::select! {
            next = outbound.recv() => match next {
                Some(package) => package,
                None => break,
            },
            _ = &mut closed => {
                buf.clear();
                while let Ok(package) = outbound.try_recv() {
                    if let Err(err) = encoder.encode(&package, &mut buf) {
                        let _ = encoder.encode(&header_only_failure(&package, &err), &mut buf);
                    }
                }
                if !buf.is_empty() {
                    let _ = writer.write_all(&buf).await;
                }
                break;
            }
        };
        buf.clear();
        if let Err(err) = encoder.encode(&package, &mut buf) {
            let fallback = header_only_failure(&package, &err);
            buf.clear();
            if let Err(err) = encoder.encode(&fallback, &mut buf) {
                tracing::warn!("dropping {} for client: {}", package.header.command, err);
                continue;
            }
            tracing::warn!(
                seq = %package.header.seq,
                "{} does not fit a frame, sent without body: {}",
                package.header.command,
                err
            );
        }
        if let Err(err) = writer.write_all(&buf).await {
            tracing::warn!("write to client failed: {err:?}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
