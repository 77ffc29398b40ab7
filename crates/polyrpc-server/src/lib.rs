//! # polyrpc Server Engine
//!
//! The request-processing engine shared by every transport: protocol codec
//! orchestration, method dispatch through a middleware chain, per-request
//! context, and an asynchronous logging pipeline that stays off the request
//! path. Six listeners (HTTP, HTTPS, TCP, TLS, WebSocket, Secure WebSocket)
//! deliver bytes to the same [`Processor`] and transmit whatever it
//! returns, so a client sees identical semantics on every transport.
//!
//! ## Architecture
//!
//! ```text
//! transport bytes + ProcessingContext
//!        │
//!        ▼
//!   Processor ── codec (parse / validate / classify)
//!        │
//!        ▼
//!   Dispatcher ── HandlerRegistry lookup
//!        │
//!        ▼
//!   Chain::execute ── middleware onion ── RpcHandler
//!        │
//!        ▼
//!   response shaping (version + id echo, notification silence)
//! ```
//!
//! Logging happens strictly after the response is computed, submitted
//! through a [`TaskPipeline`] so sink latency never delays the caller.

pub mod clock;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod handlers;
pub mod health;
pub mod id;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod server;
pub mod transport;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::ServerConfig;
pub use context::{ProcessingContext, RequestContext};
pub use dispatcher::Dispatcher;
pub use handler::{FnHandler, HandlerError, RpcHandler};
pub use id::{IdGenerator, RandomIdGenerator, SequenceIdGenerator};
pub use logging::{LogDestination, LogEntry, LogFormat, LogLevel, Logger, LoggerConfig};
pub use middleware::{
    AuthenticationMiddleware, Chain, HandlerSelectionMiddleware, LoggingMiddleware, Middleware,
    Next, TracingMiddleware,
};
pub use pipeline::{PipelineError, RecordingPipeline, TaskPipeline, TokioPipeline};
pub use processor::{Outcome, Processor};
pub use registry::HandlerRegistry;
pub use server::Server;

/// Result type for server-level operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Failures raised by the server shell (listeners, TLS material, shutdown)
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("shutdown error: {0}")]
    Shutdown(#[from] pipeline::PipelineError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
