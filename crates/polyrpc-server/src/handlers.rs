//! Built-in JSON-RPC handlers: echo, calculate, time, status, and the slow
//! handler used to exercise timeout behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use polyrpc_json_rpc::{JsonRpcRequest, JsonRpcResponse, RequestId, RpcError};

use crate::clock::Clock;
use crate::context::RequestContext;
use crate::handler::{HandlerError, RpcHandler};

fn response_id(req: &JsonRpcRequest) -> RequestId {
    req.id.clone().unwrap_or(RequestId::Null)
}

/// Echoes the request params back along with call provenance.
pub struct EchoHandler {
    clock: Arc<dyn Clock>,
}

impl EchoHandler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl RpcHandler for EchoHandler {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        let echo = match &req.params {
            None => Value::Null,
            Some(params @ Value::Object(_)) => params.clone(),
            Some(_) => {
                return Ok(JsonRpcResponse::error(
                    response_id(req),
                    RpcError::parse_error(None),
                ))
            }
        };

        Ok(JsonRpcResponse::success(
            response_id(req),
            json!({
                "echo": echo,
                "request_id": ctx.request_id,
                "transport": ctx.transport,
                "timestamp": self.clock.now().to_rfc3339(),
            }),
        ))
    }
}

/// Basic arithmetic over named params {operation, a, b}.
pub struct CalculateHandler;

#[derive(Deserialize)]
struct CalculateParams {
    #[serde(default)]
    operation: String,
    a: Option<Value>,
    b: Option<Value>,
}

#[async_trait]
impl RpcHandler for CalculateHandler {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        let id = response_id(req);
        let invalid = |detail: &str| {
            Ok(JsonRpcResponse::error(
                response_id(req),
                RpcError::invalid_params(detail),
            ))
        };

        let Some(params) = &req.params else {
            return invalid("unknown operation: ");
        };

        // Non-object params or a non-string operation cannot deserialize
        // into the expected shape.
        let params: CalculateParams = match serde_json::from_value(params.clone()) {
            Ok(params) => params,
            Err(_) => {
                return Ok(JsonRpcResponse::error(id, RpcError::parse_error(None)));
            }
        };

        if params.operation.is_empty() {
            return invalid("Missing required parameter");
        }

        let (Some(a), Some(b)) = (&params.a, &params.b) else {
            return invalid("Missing required parameters");
        };

        let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
            return invalid("Failed to parse parameters");
        };

        let result = match params.operation.as_str() {
            "add" | "+" => a + b,
            "subtract" | "-" => a - b,
            "multiply" | "*" => a * b,
            "divide" | "/" => {
                if b == 0.0 {
                    return invalid("Division by zero");
                }
                a / b
            }
            _ => return invalid("Invalid operation"),
        };

        Ok(JsonRpcResponse::success(
            id,
            json!({
                "result": result,
                "operation": params.operation,
                "operands": [a, b],
                "request_id": ctx.request_id,
            }),
        ))
    }
}

/// Reports the current server time in several shapes.
pub struct TimeHandler {
    clock: Arc<dyn Clock>,
}

impl TimeHandler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl RpcHandler for TimeHandler {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        let now = self.clock.now();

        Ok(JsonRpcResponse::success(
            response_id(req),
            json!({
                "time": now.to_rfc3339(),
                "timestamp": now.to_rfc3339(),
                "formatted": now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                "unix": now.timestamp(),
                "timezone": "UTC",
                "request_id": ctx.request_id,
                "server_time": now.to_rfc3339(),
            }),
        ))
    }
}

/// Reports service health plus uptime since handler registration.
pub struct StatusHandler {
    clock: Arc<dyn Clock>,
    version: String,
    started_at: DateTime<Utc>,
}

impl StatusHandler {
    pub fn new(clock: Arc<dyn Clock>, version: impl Into<String>) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            version: version.into(),
            started_at,
        }
    }
}

#[async_trait]
impl RpcHandler for StatusHandler {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        let now = self.clock.now();

        Ok(JsonRpcResponse::success(
            response_id(req),
            json!({
                "status": "healthy",
                "timestamp": now.to_rfc3339(),
                "transport": ctx.transport,
                "request_id": ctx.request_id,
                "version": self.version,
                "uptime_secs": self.clock.since(self.started_at).num_seconds(),
            }),
        ))
    }
}

/// Sleeps two seconds before answering; exists to exercise transport
/// timeouts and slow-call behavior.
pub struct SlowHandler {
    clock: Arc<dyn Clock>,
}

impl SlowHandler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl RpcHandler for SlowHandler {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        _ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        self.clock.sleep(Duration::from_secs(2)).await;

        Ok(JsonRpcResponse::success(
            response_id(req),
            json!("slow operation completed"),
        ))
    }
}
