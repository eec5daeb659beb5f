//! Client groups: sessions of one group share a producer and a retry scheduler.

use super::retry::Retryer;
use super::session::Session;
use crate::config::{BackendConfig, DispatchConfig};
use crate::net::Transport;
use crate::producer::{Backend, BackendSettings, Producer, ProducerError};
use crate::protocol::UserAgent;
use crate::time::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Creates the backend for a producer group.
pub type BackendFactory = Arc<dyn Fn(&str) -> Arc<dyn Backend> + Send + Sync>;

pub struct ClientGroup<C: Clock> {
    name: String,
    producer: Producer,
    retryer: Arc<Retryer<C>>,
    sessions: AtomicUsize,
    retry_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock> ClientGroup<C> {
    pub fn new(name: impl Into<String>, producer: Producer, retryer: Arc<Retryer<C>>) -> Self {
        Self {
            name: name.into(),
            producer,
            retryer,
            sessions: AtomicUsize::new(0),
            retry_loop: Mutex::new(None),
        }
    }

    /// Start the producer and the retry dispatch loop. Needs a tokio runtime.
    pub fn start(&self) -> Result<(), ProducerError> {
        self.producer.start()?;
        let mut retry_loop = self.retry_loop.lock();
        if retry_loop.is_none() {
            *retry_loop = Some(self.retryer.start());
        }
        tracing::info!(group = %self.name, "client group started");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.retryer.shutdown();
        if let Some(handle) = self.retry_loop.lock().take() {
            handle.abort();
        }
        self.producer.shutdown();
        tracing::info!(group = %self.name, "client group shutdown");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn retryer(&self) -> &Arc<Retryer<C>> {
        &self.retryer
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    pub(crate) fn session_opened(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        let _ = self
            .sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

/// Groups by name, created on first use.
pub struct ClientGroupRegistry<C: Clock> {
    clock: C,
    dispatch: DispatchConfig,
    backend: BackendConfig,
    factory: BackendFactory,
    groups: Mutex<HashMap<String, Arc<ClientGroup<C>>>>,
}

impl<C: Clock> ClientGroupRegistry<C> {
    pub fn new(
        clock: C,
        dispatch: DispatchConfig,
        backend: BackendConfig,
        factory: BackendFactory,
    ) -> Self {
        Self {
            clock,
            dispatch,
            backend,
            factory,
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatch_config(&self) -> &DispatchConfig {
        &self.dispatch
    }

    /// Existing group `name`, or a freshly started one.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<ClientGroup<C>>, ProducerError> {
        let mut groups = self.groups.lock();
        self.get_or_create_locked(&mut groups, name)
    }

    fn get_or_create_locked(
        &self,
        groups: &mut HashMap<String, Arc<ClientGroup<C>>>,
        name: &str,
    ) -> Result<Arc<ClientGroup<C>>, ProducerError> {
        if let Some(group) = groups.get(name) {
            return Ok(Arc::clone(group));
        }
        let mut settings = BackendSettings::from_config(&self.backend, &self.dispatch);
        settings.producer_group = format!("{}-{}", self.backend.producer_group, name);
        let producer = Producer::new((self.factory)(name), settings);
        let retryer = Arc::new(Retryer::new(self.clock.clone(), self.dispatch.max_retries));
        let group = Arc::new(ClientGroup::new(name, producer, retryer));
        group.start()?;
        groups.insert(name.to_string(), Arc::clone(&group));
        Ok(group)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClientGroup<C>>> {
        self.groups.lock().get(name).cloned()
    }

    pub fn groups(&self) -> Vec<Arc<ClientGroup<C>>> {
        self.groups.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }

    /// Running session for `client` in its group.
    pub fn open_session(
        &self,
        client: UserAgent,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Session<C>>, ProducerError> {
        // Opened under the registry lock so an idle-group eviction cannot interleave.
        let mut groups = self.groups.lock();
        let group = self.get_or_create_locked(&mut groups, &client.group)?;
        let session = Session::new(
            client,
            transport,
            group,
            self.dispatch.clone(),
            self.clock.clone(),
        );
        session.open();
        Ok(session)
    }

    /// Close `session` and shut its group down once no session is left in it.
    /// Retries still queued for the group are dropped with it.
    pub fn close_session(&self, session: &Session<C>) {
        session.close();
        let name = session.group().name();
        let evicted = {
            let mut groups = self.groups.lock();
            let idle = groups.get(name).is_some_and(|group| {
                Arc::ptr_eq(group, session.group()) && group.session_count() == 0
            });
            if idle {
                groups.remove(name)
            } else {
                None
            }
        };
        if let Some(group) = evicted {
            tracing::info!(group = %group.name(), "last session closed, evicting client group");
            group.shutdown();
        }
    }

    pub fn shutdown(&self) {
        let groups: Vec<_> = self.groups.lock().drain().map(|(_, g)| g).collect();
        for group in groups {
            group.shutdown();
        }
    }
}
