use crate::config::{BackendConfig, BackendKind, Config};
use crate::dispatch::{BackendFactory, ClientGroupRegistry};
use crate::net::MeshServer;
use crate::producer::{Backend, MemoryBackend};
use crate::telemetry::{self, AdminContext, LogHandle};
use crate::time::Clock;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runtime scaffold: wires the backend, client groups, TCP server, admin endpoint and shutdown.
pub struct Runtime<C: Clock> {
    config: Config,
    clock: C,
    registry: Arc<ClientGroupRegistry<C>>,
    server: Arc<MeshServer<C>>,
    ready: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    admin_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    log_handle: Option<LogHandle>,
}

impl<C: Clock> Runtime<C> {
    pub fn new(config: Config, clock: C, log_handle: Option<LogHandle>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(ClientGroupRegistry::new(
            clock.clone(),
            config.dispatch.clone(),
            config.backend.clone(),
            backend_factory(&config.backend),
        ));
        let server = Arc::new(MeshServer::new(
            Arc::clone(&registry),
            clock.clone(),
            config.server.max_frame_bytes,
        ));
        Ok(Self {
            config,
            clock,
            registry,
            server,
            ready: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            admin_addr: None,
            tasks: Vec::new(),
            shutdown_tx,
            shutdown_rx,
            log_handle,
        })
    }

    /// Start serving and block until Ctrl-C or a requested shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.handle_shutdown().await
    }

    /// Bind the listener and the admin endpoint without waiting for shutdown.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let (addr, accept) = self
            .server
            .start(&self.config.server.bind, self.shutdown_rx.clone())
            .await?;
        self.local_addr = Some(addr);
        self.tasks.push(accept);
        self.start_admin().await?;
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(
            backend = ?self.config.backend.kind,
            retry_delay_ms = self.config.dispatch.retry_delay_ms,
            backpressure_capacity = self.config.dispatch.backpressure_capacity,
            max_retries = self.config.dispatch.max_retries,
            "meshd serving on {}",
            addr
        );
        Ok(addr)
    }

    async fn start_admin(&mut self) -> Result<()> {
        if let Some(bind) = &self.config.telemetry.admin_bind {
            let ctx = AdminContext {
                server: Arc::clone(&self.server),
                ready: Arc::clone(&self.ready),
                log_handle: self.log_handle.clone(),
            };
            let (addr, handle) =
                telemetry::start_admin(bind, ctx, self.shutdown_rx.clone()).await?;
            self.admin_addr = Some(addr);
            self.tasks.push(handle);
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> C {
        self.clock.clone()
    }

    pub fn registry(&self) -> &Arc<ClientGroupRegistry<C>> {
        &self.registry
    }

    pub fn server(&self) -> &Arc<MeshServer<C>> {
        &self.server
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn log_handle(&self) -> Option<LogHandle> {
        self.log_handle.clone()
    }

    /// Sender that stops `run` when set to true.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    async fn handle_shutdown(&mut self) -> Result<()> {
        let mut shutdown = self.shutdown_rx.clone();
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for ctrl-c")?;
                tracing::warn!("shutdown signal received");
            }
            _ = shutdown.changed() => {
                tracing::info!("shutdown requested by component");
            }
        }
        self.shutdown().await
    }

    /// Stop accepting, say goodbye to connected clients, and stop every client group.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("draining runtime components for shutdown");
        self.ready.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
        for handle in self.tasks.drain(..) {
            if let Err(err) = handle.await {
                tracing::warn!("runtime task ended abnormally: {err:?}");
            }
        }
        self.registry.shutdown();
        Ok(())
    }
}

fn backend_factory(cfg: &BackendConfig) -> BackendFactory {
    match cfg.kind {
        BackendKind::Memory => {
            let latency = Duration::from_millis(cfg.memory_latency_ms);
            Arc::new(move |_group: &str| {
                Arc::new(MemoryBackend::new().with_latency(latency)) as Arc<dyn Backend>
            })
        }
    }
}
