//! In-process backend.
//!
//! Accepts messages into memory and completes async sends and requests on spawned
//! tokio tasks, the way a networked client completes them on its callback threads.
//! Failures, completion latency and request replies can be scripted, which makes it
//! the backend of choice for local runs and for exercising the dispatch path.

use super::backend::{
    Backend, BackendError, BackendMessage, BackendReplyCallback, BackendSendCallback,
    BackendSendResult, BackendSettings, ServiceState,
};
use super::message::PROPERTY_UNIQ_KEY;
use super::new_unique_id;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Builds a reply for a request; `None` lets the request time out.
pub type Responder = Arc<dyn Fn(&BackendMessage) -> Option<BackendMessage> + Send + Sync>;

#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: Mutex<ServiceState>,
    settings: Mutex<Option<BackendSettings>>,
    accepted: Mutex<Vec<BackendMessage>>,
    next_offset: AtomicU64,
    attempts: AtomicU64,
    fail_next: AtomicU32,
    reject_next: AtomicU32,
    failure: Mutex<BackendError>,
    latency: Mutex<Duration>,
    responder: Mutex<Option<Responder>>,
    completion_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(ServiceState::CreateJust),
                settings: Mutex::new(None),
                accepted: Mutex::new(Vec::new()),
                next_offset: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                fail_next: AtomicU32::new(0),
                reject_next: AtomicU32::new(0),
                failure: Mutex::new(BackendError::Broker {
                    code: 14,
                    message: "service not available now".into(),
                }),
                latency: Mutex::new(Duration::ZERO),
                responder: Mutex::new(None),
                completion_gate: Mutex::new(None),
            }),
        }
    }

    /// Backend already in the running state.
    pub fn running() -> Self {
        let backend = Self::new();
        *backend.inner.state.lock() = ServiceState::Running;
        backend
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.inner.latency.lock() = latency;
        self
    }

    /// Reject the next `count` send attempts.
    pub fn fail_next(&self, count: u32) {
        self.inner.fail_next.store(count, Ordering::SeqCst);
    }

    /// Refuse the next `count` async sends or requests at submission, before any
    /// completion is scheduled.
    pub fn reject_next(&self, count: u32) {
        self.inner.reject_next.store(count, Ordering::SeqCst);
    }

    /// Error used for scripted rejections.
    pub fn fail_with(&self, error: BackendError) {
        *self.inner.failure.lock() = error;
    }

    pub fn set_responder(&self, responder: Responder) {
        *self.inner.responder.lock() = Some(responder);
    }

    /// Park async completions until released.
    pub fn hold_completions(&self) {
        *self.inner.completion_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `count` parked completions proceed.
    pub fn release_completions(&self, count: usize) {
        if let Some(gate) = self.inner.completion_gate.lock().as_ref() {
            gate.add_permits(count);
        }
    }

    /// Stop parking completions and drain everything held so far.
    pub fn resume_completions(&self) {
        if let Some(gate) = self.inner.completion_gate.lock().take() {
            gate.close();
        }
    }

    pub fn accepted(&self) -> Vec<BackendMessage> {
        self.inner.accepted.lock().clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.inner.accepted.lock().len()
    }

    /// Send attempts seen, accepted or not.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn applied_settings(&self) -> Option<BackendSettings> {
        self.inner.settings.lock().clone()
    }

    fn ensure_running(&self) -> Result<(), BackendError> {
        let state = *self.inner.state.lock();
        if state == ServiceState::Running {
            Ok(())
        } else {
            Err(BackendError::NotRunning(format!("{state:?}")))
        }
    }

    fn check_submission(&self) -> Result<(), BackendError> {
        let rejected = self
            .inner
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            self.inner.attempts.fetch_add(1, Ordering::SeqCst);
            return Err(self.inner.failure.lock().clone());
        }
        Ok(())
    }

    fn runtime(&self) -> Result<Handle, BackendError> {
        Handle::try_current()
            .map_err(|_| BackendError::Client("no async runtime for completions".into()))
    }

    fn accept(&self, message: BackendMessage) -> Result<BackendSendResult, BackendError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted {
            return Err(self.inner.failure.lock().clone());
        }
        let msg_id = message
            .property(PROPERTY_UNIQ_KEY)
            .map(str::to_owned)
            .unwrap_or_else(new_unique_id);
        let result = BackendSendResult {
            msg_id,
            topic: message.topic.clone(),
            queue_offset: self.inner.next_offset.fetch_add(1, Ordering::SeqCst),
        };
        self.inner.accepted.lock().push(message);
        Ok(result)
    }

    /// Wait out the configured latency and any completion gate.
    fn completion_delay(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let latency = *self.inner.latency.lock();
        let gate = self.inner.completion_gate.lock().clone();
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if let Some(gate) = gate {
                // A closed gate means completions were resumed.
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn state(&self) -> ServiceState {
        *self.inner.state.lock()
    }

    fn apply_settings(&self, settings: &BackendSettings) {
        *self.inner.settings.lock() = Some(settings.clone());
    }

    fn start(&self) -> Result<(), BackendError> {
        let mut state = self.inner.state.lock();
        match *state {
            ServiceState::CreateJust | ServiceState::Running => {
                *state = ServiceState::Running;
                Ok(())
            }
            other => Err(BackendError::Client(format!(
                "cannot start producer from {other:?}"
            ))),
        }
    }

    fn shutdown(&self) {
        *self.inner.state.lock() = ServiceState::ShutdownAlready;
    }

    fn send(&self, message: BackendMessage) -> Result<BackendSendResult, BackendError> {
        self.ensure_running()?;
        self.accept(message)
    }

    fn send_oneway(&self, message: BackendMessage) -> Result<(), BackendError> {
        self.ensure_running()?;
        self.accept(message).map(|_| ())
    }

    fn send_async(
        &self,
        message: BackendMessage,
        callback: BackendSendCallback,
    ) -> Result<(), BackendError> {
        self.ensure_running()?;
        self.check_submission()?;
        let runtime = self.runtime()?;
        let outcome = self.accept(message);
        let delay = self.completion_delay();
        runtime.spawn(async move {
            delay.await;
            callback(outcome);
        });
        Ok(())
    }

    fn request(
        &self,
        message: BackendMessage,
        callback: BackendReplyCallback,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        self.ensure_running()?;
        self.check_submission()?;
        let runtime = self.runtime()?;
        let reply = match self.accept(message.clone()) {
            Ok(_) => Ok(self
                .inner
                .responder
                .lock()
                .as_ref()
                .and_then(|responder| responder(&message))),
            Err(err) => Err(err),
        };
        let delay = self.completion_delay();
        runtime.spawn(async move {
            match reply {
                Ok(Some(reply)) => {
                    delay.await;
                    callback(Ok(reply));
                }
                Ok(None) => {
                    tokio::time::sleep(timeout).await;
                    callback(Err(BackendError::Timeout(timeout)));
                }
                Err(err) => {
                    delay.await;
                    callback(Err(err));
                }
            }
        });
        Ok(())
    }
}
