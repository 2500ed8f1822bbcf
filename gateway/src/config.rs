use serde::Deserialize;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("max_request_body_size cannot be 0")]
    ZeroBodyCap,

    #[error("worker_threads cannot be 0")]
    ZeroWorkerThreads,
}

/// Gateway configuration, loaded from a YAML file at startup and passed by
/// reference from then on; nothing mutates it after load.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Listener for incoming requests
    #[serde(default)]
    pub listener: Listener,
    /// Tokio worker threads for the request runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Upper bound on an upload body, declared or accumulated
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
    /// How long a stalled connection may wait between events
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Drain bound for graceful shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Negotiate HTTP/2 on the listener
    #[serde(default = "default_true")]
    pub enable_http2: bool,
    /// TLS certificate material; serving TLS is not wired up yet and the
    /// gateway falls back to plain HTTP with a warning.
    pub tls: Option<TlsConfig>,
    /// StatsD exporter target; metrics are dropped when absent.
    pub metrics: Option<MetricsConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        // Localhost only unless explicitly configured otherwise.
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.max_request_body_size == 0 {
            return Err(ValidationError::ZeroBodyCap);
        }
        if self.worker_threads == 0 {
            return Err(ValidationError::ZeroWorkerThreads);
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_request_body_size() -> usize {
    DEFAULT_MAX_REQUEST_BODY_SIZE
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
