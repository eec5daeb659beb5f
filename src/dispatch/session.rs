//! Per-connection dispatch state.

use super::backpressure::UpstreamBuffer;
use super::error::SessionError;
use super::group::ClientGroup;
use super::retry::Retryer;
use super::upstream::UpstreamMsgContext;
use crate::config::DispatchConfig;
use crate::net::Transport;
use crate::producer::{Message, Producer};
use crate::protocol::{
    reply_command_for, Command, Header, OpStatus, Package, UserAgent, WireMessage,
};
use crate::time::{elapsed_ms, Clock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Closed,
}

/// Point-in-time counters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub upstream_msg_count: u64,
    pub success_msg_count: u64,
    pub fail_msg_count: u64,
    pub in_flight: usize,
    pub available_permits: usize,
}

pub struct Session<C: Clock> {
    client: UserAgent,
    transport: Arc<dyn Transport>,
    group: Arc<ClientGroup<C>>,
    config: DispatchConfig,
    clock: C,
    upstream_buff: UpstreamBuffer,
    state: Mutex<SessionState>,
    upstream_msg_count: AtomicU64,
    success_msg_count: AtomicU64,
    fail_msg_count: AtomicU64,
    created_at: Instant,
}

impl<C: Clock> Session<C> {
    pub fn new(
        client: UserAgent,
        transport: Arc<dyn Transport>,
        group: Arc<ClientGroup<C>>,
        config: DispatchConfig,
        clock: C,
    ) -> Arc<Self> {
        let created_at = clock.now();
        Arc::new(Self {
            client,
            transport,
            group,
            upstream_buff: UpstreamBuffer::new(config.backpressure_capacity),
            config,
            clock,
            state: Mutex::new(SessionState::Created),
            upstream_msg_count: AtomicU64::new(0),
            success_msg_count: AtomicU64::new(0),
            fail_msg_count: AtomicU64::new(0),
            created_at,
        })
    }

    /// Created -> Running. Returns false when the session was already opened or closed.
    pub fn open(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Created {
            return false;
        }
        *state = SessionState::Running;
        self.group.session_opened();
        tracing::info!(
            client = %self.client,
            peer = self.transport.peer(),
            group = self.group.name(),
            "session opened"
        );
        true
    }

    /// Tear the session down. Sends still in flight complete against the backend,
    /// but callers blocked on the upstream buffer are released with an error.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            if *state == SessionState::Running {
                self.group.session_closed();
            }
            *state = SessionState::Closed;
        }
        self.upstream_buff.close();
        self.transport.close();
        let stats = self.stats();
        tracing::info!(
            client = %self.client,
            peer = self.transport.peer(),
            upstream = stats.upstream_msg_count,
            success = stats.success_msg_count,
            failed = stats.fail_msg_count,
            in_flight = stats.in_flight,
            "session closed after {}ms",
            elapsed_ms(self.created_at, self.clock.now())
        );
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn client(&self) -> &UserAgent {
        &self.client
    }

    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn group(&self) -> &Arc<ClientGroup<C>> {
        &self.group
    }

    pub fn producer(&self) -> &Producer {
        self.group.producer()
    }

    pub fn retryer(&self) -> &Arc<Retryer<C>> {
        self.group.retryer()
    }

    pub fn upstream_buffer(&self) -> &UpstreamBuffer {
        &self.upstream_buff
    }

    pub fn fail_msg_count(&self) -> u64 {
        self.fail_msg_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            upstream_msg_count: self.upstream_msg_count.load(Ordering::Relaxed),
            success_msg_count: self.success_msg_count.load(Ordering::Relaxed),
            fail_msg_count: self.fail_msg_count.load(Ordering::Relaxed),
            in_flight: self.upstream_buff.in_flight(),
            available_permits: self.upstream_buff.available(),
        }
    }

    /// Accept one client package for upstream dispatch.
    ///
    /// Invalid packages are answered with a FAIL acknowledgment and returned as errors;
    /// valid ones run their first attempt before this returns, which includes waiting
    /// for a backpressure permit.
    pub async fn handle_upstream(
        self: &Arc<Self>,
        header: Header,
        message: Option<WireMessage>,
        start_time: Instant,
    ) -> Result<(), SessionError> {
        let task_execute_time = self.clock.now();
        if !self.is_running() {
            return Err(SessionError::Closed(self.transport.peer().to_string()));
        }
        let checked = if header.command.is_upstream() {
            message.ok_or(SessionError::MissingMessage(header.command))
        } else {
            Err(SessionError::UnsupportedCommand(header.command))
        };
        let wire = match checked {
            Ok(wire) => wire,
            Err(err) => {
                tracing::warn!(
                    seq = %header.seq,
                    client = %self.client,
                    "rejecting upstream package: {}",
                    err
                );
                let ack = Header::ack_with_desc(
                    reply_command_for(header.command),
                    OpStatus::Fail,
                    err.to_string(),
                    header.seq.clone(),
                );
                self.write_and_flush(Package::new(ack), start_time, task_execute_time);
                return Err(err);
            }
        };
        let ctx = UpstreamMsgContext::new(
            Arc::clone(self),
            header,
            Message::from_wire(&wire),
            start_time,
            task_execute_time,
        );
        ctx.dispatch().await;
        Ok(())
    }

    /// Issue one send attempt for `ctx`, guarded by the upstream buffer. The permit
    /// travels into the completion callback; if the producer rejects the attempt
    /// synchronously the callback is dropped and the permit with it.
    pub(crate) async fn upstream_msg(
        &self,
        ctx: UpstreamMsgContext<C>,
    ) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::Closed(self.transport.peer().to_string()));
        }
        let permit = self.upstream_buff.acquire().await?;
        self.upstream_msg_count.fetch_add(1, Ordering::Relaxed);
        let mut message = ctx.message().clone();
        let producer = self.group.producer();
        if ctx.header().command == Command::RequestToServer {
            let timeout = message
                .ttl()
                .unwrap_or_else(|| self.config.request_timeout());
            producer.request(&mut message, ctx.into_request_callback(permit), timeout)?;
        } else {
            producer.send_async(&mut message, ctx.into_send_callback(permit))?;
        }
        Ok(())
    }

    /// Hand `package` to the connection writer and log the round-trip latency.
    pub fn write_and_flush(
        &self,
        package: Package,
        start_time: Instant,
        task_execute_time: Instant,
    ) {
        let command = package.header.command;
        let seq = package.header.seq.clone();
        let code = package.header.code;
        match self.transport.write_and_flush(package) {
            Ok(()) => {
                let now = self.clock.now();
                tracing::debug!(
                    "pkg|mq2eventMesh|cmd={}|seq={}|code={}|client={}|wait={}ms|cost={}ms",
                    command,
                    seq,
                    code,
                    self.client,
                    elapsed_ms(start_time, task_execute_time),
                    elapsed_ms(start_time, now)
                );
            }
            Err(err) => {
                tracing::warn!(
                    seq = %seq,
                    client = %self.client,
                    "failed to write {} to client: {}",
                    command,
                    err
                );
            }
        }
    }

    pub(crate) fn record_success(&self) {
        self.success_msg_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.fail_msg_count.fetch_add(1, Ordering::Relaxed);
    }
}
