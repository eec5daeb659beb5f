use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/meshd.toml";

/// Top-level configuration for the meshd runtime.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Client-facing TCP listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound for a single inbound or outbound frame.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Values the upstream dispatch path and its retry scheduler consume.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Concurrent in-flight async sends allowed per session.
    #[serde(default = "default_backpressure_capacity")]
    pub backpressure_capacity: usize,
    /// Retries after the first attempt; a context past this count is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Request/reply timeout used when the message carries no TTL.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl DispatchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            backpressure_capacity: default_backpressure_capacity(),
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            other => bail!("invalid backend.kind {}", other),
        }
    }
}

/// Backend producer tuning applied by the producer facade at construction.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,
    #[serde(default = "default_producer_group")]
    pub producer_group: String,
    #[serde(default = "default_poll_name_server_interval_ms")]
    pub poll_name_server_interval_ms: u64,
    #[serde(default = "default_compress_body_over_bytes")]
    pub compress_body_over_bytes: usize,
    /// Artificial completion latency for the in-process backend.
    #[serde(default)]
    pub memory_latency_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            producer_group: default_producer_group(),
            poll_name_server_interval_ms: default_poll_name_server_interval_ms(),
            compress_body_over_bytes: default_compress_body_over_bytes(),
            memory_latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelemetryConfig {
    pub log_level: Option<String>,
    /// HTTP endpoint for metrics, health and log level; disabled when unset.
    pub admin_bind: Option<String>,
}

impl Config {
    /// Load configuration from a path resolved via MESHD_CONFIG or defaults to `config/meshd.toml`.
    pub fn load_from_env() -> Result<Self> {
        let path = env_config_path();
        let mut cfg = Self::load(&path)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load configuration from a specific file (TOML or JSON based on extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        if is_json(path_ref) {
            Ok(serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?)
        } else {
            Ok(toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind.trim().is_empty() {
            bail!("server.bind must be non-empty");
        }
        if self.server.max_frame_bytes == 0 {
            bail!("server.max_frame_bytes must be > 0");
        }
        if self.dispatch.backpressure_capacity == 0 {
            bail!("dispatch.backpressure_capacity must be > 0");
        }
        if self.dispatch.retry_delay_ms == 0 {
            bail!("dispatch.retry_delay_ms must be > 0");
        }
        if self.dispatch.request_timeout_ms == 0 {
            bail!("dispatch.request_timeout_ms must be > 0");
        }
        if self.backend.producer_group.is_empty() {
            bail!("backend.producer_group must be non-empty");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("MESHD_LOG_LEVEL") {
            self.telemetry.log_level = Some(level);
        }
        if let Ok(bind) = std::env::var("MESHD_BIND") {
            self.server.bind = bind;
        }
        if let Ok(bind) = std::env::var("MESHD_ADMIN_BIND") {
            self.telemetry.admin_bind = Some(bind);
        }
    }
}

fn env_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MESHD_CONFIG") {
        PathBuf::from(path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }
}

fn is_json(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("json"))
}

fn default_bind() -> String {
    "0.0.0.0:10000".into()
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_retry_delay_ms() -> u64 {
    10_000
}

fn default_backpressure_capacity() -> usize {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Memory
}

fn default_producer_group() -> String {
    "meshd-producer".into()
}

fn default_poll_name_server_interval_ms() -> u64 {
    60_000
}

fn default_compress_body_over_bytes() -> usize {
    10
}
