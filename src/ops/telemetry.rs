use crate::net::MeshServer;
use crate::time::Clock;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

pub type LogHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Initialize JSON logging with reloadable level.
pub fn init_tracing(log_level: Option<&str>) -> Result<LogHandle> {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let fmt_layer = fmt::layer().json().with_target(true);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    Ok(handle)
}

/// Swap the active filter for `level`.
pub fn set_log_level(handle: &LogHandle, level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level {level:?}"))?;
    handle
        .modify(|f| *f = filter)
        .map_err(|e| anyhow::anyhow!("failed to reload log level: {e}"))?;
    tracing::info!("log level set to {}", level);
    Ok(())
}

/// State the admin endpoint reads from.
pub struct AdminContext<C: Clock> {
    pub server: Arc<MeshServer<C>>,
    pub ready: Arc<AtomicBool>,
    pub log_handle: Option<LogHandle>,
}

impl<C: Clock> Clone for AdminContext<C> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            ready: Arc::clone(&self.ready),
            log_handle: self.log_handle.clone(),
        }
    }
}

/// Start a minimal HTTP endpoint serving metrics, health, and loglevel controls.
pub async fn start_admin<C: Clock>(
    bind: &str,
    ctx: AdminContext<C>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind admin endpoint on {bind}"))?;
    let addr = listener
        .local_addr()
        .context("failed to read admin endpoint address")?;
    tracing::info!("admin endpoint listening on {}", addr);
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                res = listener.accept() => match res {
                    Ok((mut socket, _)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_conn(&mut socket, ctx).await {
                                tracing::warn!("admin handler error: {err:?}");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!("admin accept error: {err:?}");
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    });
    Ok((addr, handle))
}

async fn handle_conn<C: Clock>(
    socket: &mut tokio::net::TcpStream,
    ctx: AdminContext<C>,
) -> Result<()> {
    let mut buf = [0u8; 4096];
    let n = socket.read(&mut buf).await?;
    let req = String::from_utf8_lossy(&buf[..n]);
    let first = req.lines().next().unwrap_or("");
    let target = first.split_whitespace().nth(1).unwrap_or("/");
    let (route, query) = target.split_once('?').unwrap_or((target, ""));
    let (status, body, content_type) = match route {
        "/metrics" => (200, render_metrics(&ctx.server), "text/plain"),
        "/livez" => (200, "ok".to_string(), "text/plain"),
        "/readyz" => {
            if ctx.ready.load(Ordering::SeqCst) {
                (200, "ready".to_string(), "text/plain")
            } else {
                (503, "not ready".to_string(), "text/plain")
            }
        }
        "/v1/loglevel" => match (&ctx.log_handle, query.strip_prefix("level=")) {
            (Some(handle), Some(level)) => match set_log_level(handle, level) {
                Ok(()) => (200, "{\"status\":\"ok\"}".to_string(), "application/json"),
                Err(err) => (
                    400,
                    format!("{{\"status\":\"{}\"}}", err),
                    "application/json",
                ),
            },
            (None, _) => (
                409,
                "{\"status\":\"log level not reloadable\"}".to_string(),
                "application/json",
            ),
            (_, None) => (
                400,
                "{\"status\":\"missing level\"}".to_string(),
                "application/json",
            ),
        },
        _ => (404, "not found".to_string(), "text/plain"),
    };
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        _ => "Service Unavailable",
    };
    let resp = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );
    socket.write_all(resp.as_bytes()).await?;
    Ok(())
}

/// Prometheus text exposition of session, group and retry counters.
pub fn render_metrics<C: Clock>(server: &MeshServer<C>) -> String {
    let sessions = server.sessions();
    let (mut upstream, mut success, mut failed, mut in_flight) = (0u64, 0u64, 0u64, 0u64);
    for session in &sessions {
        let stats = session.stats();
        upstream = upstream.saturating_add(stats.upstream_msg_count);
        success = success.saturating_add(stats.success_msg_count);
        failed = failed.saturating_add(stats.fail_msg_count);
        in_flight = in_flight.saturating_add(stats.in_flight as u64);
    }
    let registry = server.registry();
    let totals = [
        ("meshd_sessions", sessions.len() as u64),
        ("meshd_client_groups", registry.len() as u64),
        ("meshd_upstream_msgs_total", upstream),
        ("meshd_success_msgs_total", success),
        ("meshd_failed_msgs_total", failed),
        ("meshd_inflight_sends", in_flight),
    ];
    let mut body = String::new();
    for (name, value) in totals {
        body.push_str(&format!("{name} {value}\n"));
    }
    let mut groups = registry.groups();
    groups.sort_by(|a, b| a.name().cmp(b.name()));
    for group in groups {
        let retry = group.retryer().stats();
        let series = [
            ("meshd_group_sessions", group.session_count() as u64),
            ("meshd_retry_pending", group.retryer().len() as u64),
            ("meshd_retry_scheduled_total", retry.scheduled),
            ("meshd_retry_fired_total", retry.fired),
            ("meshd_retry_exhausted_total", retry.exhausted),
        ];
        for (name, value) in series {
            body.push_str(&format!("{name}{{group=\"{}\"}} {value}\n", group.name()));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, DispatchConfig};
    use crate::dispatch::ClientGroupRegistry;
    use crate::producer::{Backend, MemoryBackend};
    use crate::time::SystemClock;

    #[tokio::test]
    async fn metrics_cover_groups_and_retries() {
        let registry = Arc::new(ClientGroupRegistry::new(
            SystemClock,
            DispatchConfig::default(),
            BackendConfig::default(),
            Arc::new(|_: &str| Arc::new(MemoryBackend::new()) as Arc<dyn Backend>),
        ));
        registry.get_or_create("orders").unwrap();
        let server = MeshServer::new(registry, SystemClock, 1024);
        let body = render_metrics(&server);
        assert!(body.contains("meshd_sessions 0\n"));
        assert!(body.contains("meshd_client_groups 1\n"));
        assert!(body.contains("meshd_retry_pending{group=\"orders\"} 0\n"));
    }
}
