//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Result, ServerError};

/// Listener addresses and connection tuning for all six transports.
///
/// An address of `None` disables that listener. The TLS-family listeners
/// (HTTPS, TLS, WSS) additionally require certificate material; without it
/// they are skipped with a warning at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: Option<SocketAddr>,
    pub https_addr: Option<SocketAddr>,
    pub tcp_addr: Option<SocketAddr>,
    pub tls_addr: Option<SocketAddr>,
    pub ws_addr: Option<SocketAddr>,
    pub wss_addr: Option<SocketAddr>,

    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Connection-oriented transports drop connections idle this long
    pub idle_timeout: Duration,
    /// Maximum HTTP request body size in bytes
    pub max_body_size: usize,

    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,

    pub service_name: String,
    pub service_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: Some(([0, 0, 0, 0], 8080).into()),
            https_addr: Some(([0, 0, 0, 0], 8443).into()),
            tcp_addr: Some(([0, 0, 0, 0], 8081).into()),
            tls_addr: Some(([0, 0, 0, 0], 8444).into()),
            ws_addr: Some(([0, 0, 0, 0], 8082).into()),
            wss_addr: Some(([0, 0, 0, 0], 8445).into()),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_body_size: 1024 * 1024, // 1MB
            tls_cert_path: None,
            tls_key_path: None,
            service_name: "polyrpc".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `POLYRPC_*` environment variables. Setting an
    /// address variable to the empty string or `disabled` turns that
    /// listener off.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            http_addr: env_addr("POLYRPC_HTTP_ADDR", defaults.http_addr)?,
            https_addr: env_addr("POLYRPC_HTTPS_ADDR", defaults.https_addr)?,
            tcp_addr: env_addr("POLYRPC_TCP_ADDR", defaults.tcp_addr)?,
            tls_addr: env_addr("POLYRPC_TLS_ADDR", defaults.tls_addr)?,
            ws_addr: env_addr("POLYRPC_WS_ADDR", defaults.ws_addr)?,
            wss_addr: env_addr("POLYRPC_WSS_ADDR", defaults.wss_addr)?,
            read_timeout: env_secs("POLYRPC_READ_TIMEOUT_SECS", defaults.read_timeout)?,
            write_timeout: env_secs("POLYRPC_WRITE_TIMEOUT_SECS", defaults.write_timeout)?,
            idle_timeout: env_secs("POLYRPC_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            max_body_size: defaults.max_body_size,
            tls_cert_path: env_path("POLYRPC_TLS_CERT"),
            tls_key_path: env_path("POLYRPC_TLS_KEY"),
            service_name: std::env::var("POLYRPC_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            service_version: defaults.service_version,
        })
    }

    pub fn has_tls_material(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}

fn env_addr(key: &str, default: Option<SocketAddr>) -> Result<Option<SocketAddr>> {
    match std::env::var(key) {
        Ok(value) if value.is_empty() || value == "disabled" => Ok(None),
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ServerError::Config(format!("{}: invalid address '{}'", key, value))),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ServerError::Config(format!("{}: invalid seconds '{}'", key, value))),
        Err(_) => Ok(default),
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}
