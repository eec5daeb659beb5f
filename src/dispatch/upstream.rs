//! Upstream dispatch task: one client request coupled to one backend send attempt.
//!
//! A context is consumed by its attempt. The completion callback owns it together
//! with the backpressure permit, acknowledges the client, and on a retryable failure
//! hands a fresh context with `retry_count + 1` to the group's retry scheduler.

use super::backpressure::UpstreamPermit;
use super::error::SessionError;
use super::retry::{RetryContext, RetryDecision, RetryFuture, RetryTask};
use super::session::Session;
use crate::producer::message::PROPERTY_UNIQ_KEY;
use crate::producer::{ExceptionContext, Message, RequestCallback, SendCallback, SendOutcome};
use crate::protocol::{reply_command_for, Command, Header, OpStatus, Package};
use crate::time::{elapsed_ms, Clock};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub struct UpstreamMsgContext<C: Clock> {
    retry: RetryContext,
    session: Arc<Session<C>>,
    header: Header,
    create_time: Instant,
    /// When the originating package was read off the connection.
    start_time: Instant,
    /// When the request was picked up for dispatch.
    task_execute_time: Instant,
}

impl<C: Clock> UpstreamMsgContext<C> {
    pub fn new(
        session: Arc<Session<C>>,
        header: Header,
        message: Message,
        start_time: Instant,
        task_execute_time: Instant,
    ) -> Self {
        let now = session.clock().now();
        Self {
            retry: RetryContext::new(header.seq.clone(), message, now),
            session,
            header,
            create_time: now,
            start_time,
            task_execute_time,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn message(&self) -> &Message {
        &self.retry.message
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.retry_count
    }

    pub fn execute_at(&self) -> Instant {
        self.retry.execute_at
    }

    pub fn session(&self) -> &Arc<Session<C>> {
        &self.session
    }

    pub fn create_time(&self) -> Instant {
        self.create_time
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn task_execute_time(&self) -> Instant {
        self.task_execute_time
    }

    pub fn reply_command(&self) -> Command {
        reply_command_for(self.header.command)
    }

    /// Run one attempt through the session's send path. A synchronous rejection is
    /// acknowledged as a failure right away; it is rescheduled only when its kind is
    /// retryable and the command is not a request/reply exchange.
    pub async fn dispatch(self) {
        let attempt = self.detached();
        let session = Arc::clone(&self.session);
        let send_time = session.clock().now();

        match session.upstream_msg(self).await {
            Ok(()) => {
                tracing::info!(
                    "pkg|eventMesh2mq|cmd={}|seq={}|retry={}|msg={}|user={}|wait={}ms|cost={}ms",
                    attempt.header.command,
                    attempt.header.seq,
                    attempt.retry.retry_count,
                    attempt.retry.message,
                    session.client(),
                    elapsed_ms(attempt.task_execute_time, send_time),
                    elapsed_ms(attempt.start_time, session.clock().now())
                );
            }
            Err(err) => attempt.on_dispatch_error(err),
        }
    }

    fn on_dispatch_error(self, err: SessionError) {
        tracing::error!(
            seq = %self.header.seq,
            retry_count = self.retry.retry_count,
            client = %self.session.client(),
            "upstream message dispatch failed, {}",
            err
        );
        let outbound = match &err {
            SessionError::Producer(cause) => {
                let outbound = self.outbound_with_id(&cause.message_id);
                if cause.is_retryable() && self.header.command != Command::RequestToServer {
                    self.schedule_retry(outbound.clone());
                }
                outbound
            }
            _ => self.retry.message.clone(),
        };
        self.session.record_failure();
        let ack = Header::ack_with_desc(
            self.reply_command(),
            OpStatus::Fail,
            err.to_string(),
            self.header.seq.clone(),
        );
        self.session.write_and_flush(
            Package::with_message(ack, outbound.to_wire()),
            self.start_time,
            self.task_execute_time,
        );
    }

    /// Completion for an async send. Owns this context and `permit`.
    pub(crate) fn into_send_callback(self, permit: UpstreamPermit) -> SendCallback {
        Box::new(move |outcome| self.on_send_complete(permit, outcome))
    }

    /// Completion for a request/reply exchange. Owns this context and `permit`.
    pub(crate) fn into_request_callback(self, permit: UpstreamPermit) -> RequestCallback {
        Box::new(move |outcome| self.on_reply(permit, outcome))
    }

    fn on_send_complete(self, permit: UpstreamPermit, outcome: SendOutcome) {
        permit.release();
        let reply_cmd = self.reply_command();
        let cost = elapsed_ms(self.create_time, self.session.clock().now());
        match outcome {
            Ok(result) => {
                self.session.record_success();
                tracing::info!(
                    seq = %self.header.seq,
                    msg_id = %result.message_id,
                    client = %self.session.client(),
                    "upstream message success|cost={}ms",
                    cost
                );
                if reply_cmd.is_send_ack() {
                    let outbound = self.outbound_with_id(&result.message_id);
                    let ack = Header::ack(reply_cmd, OpStatus::Success, self.header.seq.clone());
                    self.session.write_and_flush(
                        Package::with_message(ack, outbound.to_wire()),
                        self.start_time,
                        self.task_execute_time,
                    );
                }
            }
            Err(exception) => self.on_send_exception(reply_cmd, cost, exception),
        }
    }

    fn on_send_exception(self, reply_cmd: Command, cost: u64, exception: ExceptionContext) {
        let outbound = self.outbound_with_id(&exception.message_id);
        if exception.error.is_retryable() {
            self.schedule_retry(outbound.clone());
        }
        self.session.record_failure();
        tracing::error!(
            seq = %self.header.seq,
            msg_id = %exception.message_id,
            client = %self.session.client(),
            "upstream message failed|cost={}ms|{}",
            cost,
            exception.error
        );
        let ack = Header::ack_with_desc(
            reply_cmd,
            OpStatus::Fail,
            exception.error.to_string(),
            self.header.seq.clone(),
        );
        self.session.write_and_flush(
            Package::with_message(ack, outbound.to_wire()),
            self.start_time,
            self.task_execute_time,
        );
    }

    fn on_reply(self, permit: UpstreamPermit, outcome: Result<Message, ExceptionContext>) {
        permit.release();
        let reply_cmd = self.reply_command();
        let cost = elapsed_ms(self.create_time, self.session.clock().now());
        let package = match outcome {
            Ok(reply) => {
                self.session.record_success();
                tracing::info!(
                    seq = %self.header.seq,
                    msg_id = %reply.msg_id(),
                    client = %self.session.client(),
                    "request reply received|cost={}ms",
                    cost
                );
                let ack = Header::ack(reply_cmd, OpStatus::Success, self.header.seq.clone());
                Package::with_message(ack, reply.to_wire())
            }
            Err(exception) => {
                self.session.record_failure();
                tracing::error!(
                    seq = %self.header.seq,
                    msg_id = %exception.message_id,
                    client = %self.session.client(),
                    "request failed|cost={}ms|{}",
                    cost,
                    exception.error
                );
                let ack = Header::ack_with_desc(
                    reply_cmd,
                    OpStatus::Fail,
                    exception.error.to_string(),
                    self.header.seq.clone(),
                );
                let outbound = self.outbound_with_id(&exception.message_id);
                Package::with_message(ack, outbound.to_wire())
            }
        };
        self.session
            .write_and_flush(package, self.start_time, self.task_execute_time);
    }

    /// The in-flight message carrying the id the producer assigned to this attempt.
    fn outbound_with_id(&self, msg_id: &str) -> Message {
        let mut outbound = self.retry.message.clone();
        if !msg_id.is_empty() {
            outbound.put_system_property(PROPERTY_UNIQ_KEY, msg_id);
            outbound.set_msg_id(msg_id);
        }
        outbound
    }

    /// Hand the next attempt for `message` to the group's retry scheduler.
    fn schedule_retry(&self, message: Message) {
        let next = self.next_attempt(message);
        let decision = self.session.retryer().push_retry(Box::new(next));
        if decision != RetryDecision::Scheduled {
            tracing::warn!(
                seq = %self.header.seq,
                retry_count = self.retry.retry_count,
                "upstream message not rescheduled: {:?}",
                decision
            );
        }
    }

    /// Copy of this attempt that outlives handing the original to the send path.
    fn detached(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            session: Arc::clone(&self.session),
            header: self.header.clone(),
            create_time: self.create_time,
            start_time: self.start_time,
            task_execute_time: self.task_execute_time,
        }
    }

    fn next_attempt(&self, message: Message) -> Self {
        let now = self.session.clock().now();
        let mut retry = self
            .retry
            .next_attempt(now, self.session.config().retry_delay());
        retry.message = message;
        Self {
            retry,
            session: Arc::clone(&self.session),
            header: self.header.clone(),
            create_time: now,
            start_time: self.start_time,
            task_execute_time: self.task_execute_time,
        }
    }
}

impl<C: Clock> RetryTask for UpstreamMsgContext<C> {
    fn context(&self) -> &RetryContext {
        &self.retry
    }

    fn retry(self: Box<Self>) -> RetryFuture {
        Box::pin((*self).dispatch())
    }
}

impl<C: Clock> fmt::Display for UpstreamMsgContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UpstreamMsgContext{{seq={},retryCount={},client={},cmd={},msg={}}}",
            self.retry.seq,
            self.retry.retry_count,
            self.session.client(),
            self.header.command,
            self.retry.message
        )
    }
}
