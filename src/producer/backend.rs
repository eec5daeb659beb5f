//! Contract the producer facade requires from a message-queue backend.

use crate::config::{BackendConfig, DispatchConfig};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Message in the backend's own representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMessage {
    pub topic: String,
    pub properties: BTreeMap<String, String>,
    pub body: Bytes,
}

impl BackendMessage {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSendResult {
    pub msg_id: String,
    pub topic: String,
    pub queue_offset: u64,
}

/// Native backend failure. Normalized by the facade before reaching dispatch code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("client exception: {0}")]
    Client(String),
    #[error("broker exception code={code}: {message}")]
    Broker { code: i32, message: String },
    #[error("remoting exception: {0}")]
    Remoting(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("message rejected: {0}")]
    InvalidMessage(String),
    #[error("service not running: {0}")]
    NotRunning(String),
}

/// Backend producer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    CreateJust,
    Running,
    ShutdownAlready,
    StartFailed,
}

/// Tuning the facade pushes into the backend. Backend-level retries stay at zero so
/// every retry goes through the dispatch retry scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub producer_group: String,
    pub retry_times_when_send_failed: u32,
    pub retry_times_when_send_async_failed: u32,
    pub poll_name_server_interval: Duration,
    /// In-flight async sends the backend client itself admits.
    pub async_semaphore: usize,
    pub compress_body_over_bytes: usize,
}

impl BackendSettings {
    pub fn from_config(backend: &BackendConfig, dispatch: &DispatchConfig) -> Self {
        Self {
            producer_group: backend.producer_group.clone(),
            retry_times_when_send_failed: 0,
            retry_times_when_send_async_failed: 0,
            poll_name_server_interval: Duration::from_millis(backend.poll_name_server_interval_ms),
            async_semaphore: dispatch.backpressure_capacity,
            compress_body_over_bytes: backend.compress_body_over_bytes,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default(), &DispatchConfig::default())
    }
}

/// Completion for an async send. Invoked at most once by construction.
pub type BackendSendCallback = Box<dyn FnOnce(Result<BackendSendResult, BackendError>) + Send>;

/// Completion for a request/reply exchange.
pub type BackendReplyCallback = Box<dyn FnOnce(Result<BackendMessage, BackendError>) + Send>;

/// Backend send capability.
///
/// `send_async` and `request` complete on backend-driven tasks. When either returns
/// `Err`, the callback has not been and will not be invoked.
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn state(&self) -> ServiceState;
    fn apply_settings(&self, settings: &BackendSettings);
    fn start(&self) -> Result<(), BackendError>;
    fn shutdown(&self);

    fn send(&self, message: BackendMessage) -> Result<BackendSendResult, BackendError>;
    fn send_oneway(&self, message: BackendMessage) -> Result<(), BackendError>;
    fn send_async(
        &self,
        message: BackendMessage,
        callback: BackendSendCallback,
    ) -> Result<(), BackendError>;
    fn request(
        &self,
        message: BackendMessage,
        callback: BackendReplyCallback,
        timeout: Duration,
    ) -> Result<(), BackendError>;
}
