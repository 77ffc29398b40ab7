//! polyrpcd — the multi-transport JSON-RPC 2.0 server daemon.
//!
//! Configuration comes from `POLYRPC_*` environment variables; see
//! `ServerConfig::from_env` and `logger_config_from_env` for the full set.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use polyrpc_server::{
    LogDestination, Logger, LoggerConfig, Server, ServerConfig, SystemClock, TaskPipeline,
    TokioPipeline,
};

fn logger_config_from_env(service_name: &str, service_version: &str) -> LoggerConfig {
    let defaults = LoggerConfig::default();

    let collector_addr = std::env::var("POLYRPC_LOG_COLLECTOR_ADDR")
        .ok()
        .filter(|v| !v.is_empty());

    // Stream destination only makes sense with a collector to ship to;
    // without one the daemon logs to stdout (or a file when asked).
    let destination = match std::env::var("POLYRPC_LOG_DESTINATION").as_deref() {
        Ok("stream") => LogDestination::Stream,
        Ok("file") => LogDestination::File,
        Ok("stdout") => LogDestination::Stdout,
        _ if collector_addr.is_some() => LogDestination::Stream,
        _ => LogDestination::Stdout,
    };

    let mut extra_fields = HashMap::new();
    if let Ok(environment) = std::env::var("POLYRPC_ENVIRONMENT") {
        extra_fields.insert("environment".to_string(), environment);
    }
    if let Ok(region) = std::env::var("POLYRPC_REGION") {
        extra_fields.insert("region".to_string(), region);
    }

    LoggerConfig {
        enabled: std::env::var("POLYRPC_LOG_ENABLED").as_deref() != Ok("false"),
        destination,
        collector_addr,
        file_path: std::env::var("POLYRPC_LOG_FILE").ok().map(Into::into),
        // Log both successes and failures in the daemon.
        log_success_only: std::env::var("POLYRPC_LOG_SUCCESS_ONLY").as_deref() == Ok("true"),
        service_name: service_name.to_string(),
        service_version: service_version.to_string(),
        extra_fields,
        ..defaults
    }
}

fn banner(server: &Server) {
    info!("server started");
    for (transport, addr) in server.bound_addrs() {
        match transport {
            "HTTP" => info!("  HTTP:              http://{}/rpc", addr),
            "HTTPS" => info!("  HTTPS:             https://{}/rpc", addr),
            "TCP" => info!("  TCP:               {}", addr),
            "TLS" => info!("  TLS:               {}", addr),
            "WebSocket" => info!("  WebSocket:         ws://{}/ws", addr),
            "Secure WebSocket" => info!("  Secure WebSocket:  wss://{}/wss", addr),
            _ => info!("  {}: {}", transport, addr),
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env()?;
    let logger_config = logger_config_from_env(&config.service_name, &config.service_version);

    let pipeline: Arc<dyn TaskPipeline> = Arc::new(TokioPipeline::new());
    let clock = Arc::new(SystemClock);
    let logger = Arc::new(Logger::new(logger_config, Arc::clone(&pipeline), clock)?);

    let server = Server::new(config, logger, pipeline);
    server.start().await?;
    banner(&server);

    shutdown_signal().await;
    info!("shutdown signal received");

    if let Err(err) = server.stop().await {
        warn!(error = %err, "error during shutdown");
    }
    info!("server stopped");
    Ok(())
}
