//! Structured request logging.
//!
//! Every completed call can produce one [`LogEntry`] — an immutable
//! snapshot of the request, its context, and its outcome — shipped to the
//! configured sink through the async pipeline so sink latency never delays
//! the response.

mod sink;

pub use sink::{FileSink, LogSink, SinkError, StdoutSink, StreamSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use polyrpc_json_rpc::{JsonRpcRequest, JsonRpcResponse};

use crate::clock::Clock;
use crate::context::RequestContext;
use crate::handler::HandlerError;
use crate::pipeline::{PipelineError, TaskPipeline};
use crate::{Result, ServerError};

/// At most this many header / user-bag entries are copied into a log entry.
const MAX_COPIED_FIELDS: usize = 10;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Output encoding for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Where log entries are shipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    /// NDJSON over TCP to a collector
    Stream,
    Stdout,
    File,
}

/// Logger configuration.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub enabled: bool,
    /// Minimum severity recorded on entries
    pub level: LogLevel,
    pub format: LogFormat,
    pub destination: LogDestination,
    /// Collector address for the stream destination
    pub collector_addr: Option<String>,

    /// When set, only successful calls are logged
    pub log_success_only: bool,
    pub exclude_methods: Vec<String>,
    /// Non-empty include list acts as an allow-list and wins
    pub include_methods: Vec<String>,

    /// Sink buffer size in bytes
    pub buffer_size: usize,
    /// Upper bound on how long an entry may sit in the sink buffer
    pub flush_interval: Duration,

    /// Target file for the file destination
    pub file_path: Option<PathBuf>,

    pub service_name: String,
    pub service_version: String,
    /// Static fields stamped onto every entry
    pub extra_fields: HashMap<String, String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            format: LogFormat::Json,
            destination: LogDestination::Stream,
            collector_addr: None,
            log_success_only: true,
            exclude_methods: Vec::new(),
            include_methods: Vec::new(),
            buffer_size: 1000,
            flush_interval: Duration::from_secs(5),
            file_path: None,
            service_name: "polyrpc".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            extra_fields: HashMap::new(),
        }
    }
}

/// Immutable snapshot of one completed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Request identification
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    // Request details
    pub method: String,
    pub transport: String,
    pub remote_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    // Timing
    pub timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub duration_ms: i64,

    // Outcome
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    // Service identity
    pub service_name: String,
    pub service_version: String,

    pub level: LogLevel,

    // Bounded context copies
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub request_data: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_fields: HashMap<String, String>,
}

/// Builds and ships log entries. Entry writes always run on the async
/// pipeline, after the call's response has been computed.
pub struct Logger {
    config: LoggerConfig,
    sink: Option<tokio::sync::Mutex<Box<dyn LogSink>>>,
    pipeline: Arc<dyn TaskPipeline>,
    clock: Arc<dyn Clock>,
}

impl Logger {
    pub fn new(
        config: LoggerConfig,
        pipeline: Arc<dyn TaskPipeline>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let sink: Option<Box<dyn LogSink>> = if !config.enabled {
            None
        } else {
            Some(match config.destination {
                LogDestination::Stream => {
                    let addr = config.collector_addr.clone().ok_or_else(|| {
                        ServerError::Config("stream log destination requires a collector address".into())
                    })?;
                    Box::new(StreamSink::new(
                        addr,
                        config.format,
                        config.buffer_size,
                        config.flush_interval,
                    ))
                }
                LogDestination::Stdout => Box::new(StdoutSink::new(config.format)),
                LogDestination::File => {
                    let path = config.file_path.clone().ok_or_else(|| {
                        ServerError::Config("file log destination requires a file path".into())
                    })?;
                    Box::new(FileSink::new(
                        path,
                        config.format,
                        config.buffer_size,
                        config.flush_interval,
                    ))
                }
            })
        };

        Ok(Self {
            config,
            sink: sink.map(tokio::sync::Mutex::new),
            pipeline,
            clock,
        })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Eligibility predicate: should this call be logged at all?
    pub fn should_log(&self, req: &JsonRpcRequest, success: bool, has_error: bool) -> bool {
        if !self.config.enabled {
            return false;
        }

        if self.config.log_success_only && (!success || has_error) {
            return false;
        }

        if !self.config.include_methods.is_empty()
            && !self.config.include_methods.contains(&req.method)
        {
            return false;
        }

        if self.config.exclude_methods.contains(&req.method) {
            return false;
        }

        true
    }

    /// Build the immutable entry for a completed call.
    pub fn build_entry(
        &self,
        req: &JsonRpcRequest,
        ctx: &RequestContext,
        response: Option<&JsonRpcResponse>,
        failure: Option<&HandlerError>,
    ) -> LogEntry {
        let now = self.clock.now();
        let success = failure.is_none() && response.map_or(true, |r| r.error.is_none());

        let (level, error_code, error_message) = if let Some(failure) = failure {
            (LogLevel::Error, None, Some(failure.to_string()))
        } else if let Some(rpc_error) = response.and_then(|r| r.error.as_ref()) {
            (
                LogLevel::Warn,
                Some(rpc_error.code),
                Some(rpc_error.message.clone()),
            )
        } else {
            (LogLevel::Info, None, None)
        };

        let bag_str = |key: &str| {
            ctx.value(key)
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        };

        LogEntry {
            request_id: ctx.request_id.clone(),
            trace_id: bag_str("trace_id"),
            span_id: bag_str("span_id"),
            method: req.method.clone(),
            transport: ctx.transport.clone(),
            remote_addr: ctx.remote_addr.clone(),
            user_agent: ctx.user_agent.clone(),
            timestamp: now,
            start_time: ctx.started_at,
            duration_ms: ctx.duration().as_millis() as i64,
            success,
            error_code,
            error_message,
            handler: ctx.selected_handler.clone(),
            service_name: self.config.service_name.clone(),
            service_version: self.config.service_version.clone(),
            level,
            request_data: ctx
                .data()
                .iter()
                .take(MAX_COPIED_FIELDS)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            headers: ctx
                .headers
                .iter()
                .take(MAX_COPIED_FIELDS)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            extra_fields: self.config.extra_fields.clone(),
        }
    }

    /// Write an entry to the configured sink, falling back once to stdout.
    /// If the fallback also fails, the entry is dropped with a diagnostic.
    pub async fn write_entry(&self, entry: LogEntry) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let primary = sink.lock().await.write(&entry).await;
        let Err(err) = primary else {
            return;
        };
        warn!(error = %err, "failed to write log entry");

        if self.config.destination != LogDestination::Stdout {
            let mut fallback = StdoutSink::new(self.config.format);
            if let Err(fallback_err) = fallback.write(&entry).await {
                error!(error = %fallback_err, "fallback logging also failed, dropping entry");
            }
        }
    }

    /// Snapshot the call's data and ship the entry via the async pipeline.
    /// Returns before any sink IO happens.
    pub fn submit(
        self: &Arc<Self>,
        req: &JsonRpcRequest,
        ctx: &RequestContext,
        response: Option<&JsonRpcResponse>,
        failure: Option<&HandlerError>,
    ) -> std::result::Result<(), PipelineError> {
        let logger = Arc::clone(self);
        let req = req.clone();
        let ctx_snapshot = ctx.clone();
        let response = response.cloned();
        let failure = failure.cloned();

        self.pipeline.submit(
            ctx.cancellation(),
            Box::pin(async move {
                let entry = logger.build_entry(
                    &req,
                    &ctx_snapshot,
                    response.as_ref(),
                    failure.as_ref(),
                );
                logger.write_entry(entry).await;
            }),
        )
    }

    /// Flush and close the sink.
    pub async fn close(&self) {
        if let Some(sink) = self.sink.as_ref() {
            if let Err(err) = sink.lock().await.close().await {
                warn!(error = %err, "error closing log sink");
            }
        }
    }
}
