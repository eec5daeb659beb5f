//! Producer facade over a backend send capability.
//!
//! Every operation checks the backend lifecycle, converts the message, stamps a
//! client-side unique id onto it before handing off, and normalizes backend
//! failures into [`ProducerError`].

use super::backend::{
    Backend, BackendError, BackendMessage, BackendReplyCallback, BackendSendCallback,
    BackendSettings, ServiceState,
};
use super::error::{ProducerError, ProducerErrorKind};
use super::message::{ExceptionContext, Message, SendResult, PROPERTY_UNIQ_KEY};
use super::new_unique_id;
use std::sync::Arc;
use std::time::Duration;

pub type SendOutcome = Result<SendResult, ExceptionContext>;

/// Caller completion for [`Producer::send_async`].
pub type SendCallback = Box<dyn FnOnce(SendOutcome) + Send>;

/// Caller completion for [`Producer::request`]; success carries the reply.
pub type RequestCallback = Box<dyn FnOnce(Result<Message, ExceptionContext>) + Send>;

pub struct Producer {
    backend: Arc<dyn Backend>,
    settings: BackendSettings,
}

impl Producer {
    /// Wrap `backend`, pushing `settings` into it.
    pub fn new(backend: Arc<dyn Backend>, settings: BackendSettings) -> Self {
        backend.apply_settings(&settings);
        Self { backend, settings }
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn start(&self) -> Result<(), ProducerError> {
        self.backend.start().map_err(|err| {
            ProducerError::new(ProducerErrorKind::NotRunning, "", "", err.to_string())
        })?;
        tracing::info!(
            backend = self.backend.name(),
            group = %self.settings.producer_group,
            "producer started"
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.backend.shutdown();
        tracing::info!(backend = self.backend.name(), "producer shutdown");
    }

    pub fn is_started(&self) -> bool {
        self.backend.state() == ServiceState::Running
    }

    /// Synchronous send; blocks until the backend acknowledges.
    pub fn send(&self, message: &mut Message) -> Result<SendResult, ProducerError> {
        let backend_msg = self.prepare(message)?;
        match self.backend.send(backend_msg) {
            Ok(result) => {
                message.set_msg_id(result.msg_id.clone());
                Ok(SendResult {
                    topic: result.topic,
                    message_id: result.msg_id,
                })
            }
            Err(err) => Err(self.send_error("send", message, &err)),
        }
    }

    /// Fire-and-forget send; the message still receives its client-side id.
    pub fn send_oneway(&self, message: &mut Message) -> Result<(), ProducerError> {
        let backend_msg = self.prepare(message)?;
        self.backend
            .send_oneway(backend_msg)
            .map_err(|err| self.send_error("send oneway", message, &err))
    }

    /// Non-blocking send. `callback` fires once with the normalized outcome, unless
    /// this returns `Err`, in which case it never fires.
    pub fn send_async(
        &self,
        message: &mut Message,
        callback: SendCallback,
    ) -> Result<(), ProducerError> {
        let backend_msg = self.prepare(message)?;
        let adapter = send_callback_adapter(
            message.topic().to_string(),
            message.msg_id().to_string(),
            callback,
        );
        self.backend
            .send_async(backend_msg, adapter)
            .map_err(|err| self.send_error("send async", message, &err))
    }

    /// Request/reply; the backend fails the exchange with a timeout after `timeout`.
    pub fn request(
        &self,
        message: &mut Message,
        callback: RequestCallback,
        timeout: Duration,
    ) -> Result<(), ProducerError> {
        let backend_msg = self.prepare(message)?;
        let adapter = request_callback_adapter(
            message.topic().to_string(),
            message.msg_id().to_string(),
            callback,
        );
        self.backend
            .request(backend_msg, adapter, timeout)
            .map_err(|err| self.send_error("request", message, &err))
    }

    fn check_running(&self, message: &Message) -> Result<(), ProducerError> {
        match self.backend.state() {
            ServiceState::Running => Ok(()),
            state => Err(ProducerError::new(
                ProducerErrorKind::NotRunning,
                message.topic(),
                "",
                format!("the producer service state not OK, {state:?}"),
            )),
        }
    }

    /// Lifecycle check, conversion, then id assignment. Retries of a message keep its id.
    fn prepare(&self, message: &mut Message) -> Result<BackendMessage, ProducerError> {
        self.check_running(message)?;
        let mut backend_msg = message.to_backend()?;
        let unique_id = message
            .system_property(PROPERTY_UNIQ_KEY)
            .map(str::to_owned)
            .unwrap_or_else(new_unique_id);
        message.put_system_property(PROPERTY_UNIQ_KEY, unique_id.clone());
        message.set_msg_id(unique_id.clone());
        backend_msg
            .properties
            .insert(PROPERTY_UNIQ_KEY.to_string(), unique_id);
        Ok(backend_msg)
    }

    fn send_error(&self, op: &str, message: &Message, err: &BackendError) -> ProducerError {
        tracing::error!(
            topic = message.topic(),
            msg_id = message.msg_id(),
            error = %err,
            "{} message exception, {}",
            op,
            message
        );
        ProducerError::from_backend(message.topic(), message.msg_id(), err)
    }
}

fn send_callback_adapter(
    topic: String,
    msg_id: String,
    callback: SendCallback,
) -> BackendSendCallback {
    Box::new(move |outcome| match outcome {
        Ok(result) => callback(Ok(SendResult {
            topic: result.topic,
            message_id: result.msg_id,
        })),
        Err(err) => callback(Err(ExceptionContext::new(ProducerError::from_backend(
            &topic, &msg_id, &err,
        )))),
    })
}

fn request_callback_adapter(
    topic: String,
    msg_id: String,
    callback: RequestCallback,
) -> BackendReplyCallback {
    Box::new(move |outcome| match outcome {
        Ok(reply) => callback(Ok(Message::from_backend(reply))),
        Err(err) => callback(Err(ExceptionContext::new(ProducerError::from_backend(
            &topic, &msg_id, &err,
        )))),
    })
}
