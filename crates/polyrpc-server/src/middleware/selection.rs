//! Small bundled middleware: handler selection plus the tracing and
//! authentication seams.

use async_trait::async_trait;
use std::collections::HashMap;

use polyrpc_json_rpc::{JsonRpcRequest, JsonRpcResponse};

use crate::context::RequestContext;
use crate::handler::HandlerError;
use crate::middleware::{Middleware, Next};

/// Records which handler serves the request so log entries can name it.
pub struct HandlerSelectionMiddleware {
    handler_names: HashMap<String, String>,
}

impl HandlerSelectionMiddleware {
    pub fn new(handler_names: HashMap<String, String>) -> Self {
        Self { handler_names }
    }
}

#[async_trait]
impl Middleware for HandlerSelectionMiddleware {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<JsonRpcResponse, HandlerError> {
        ctx.selected_handler = Some(
            self.handler_names
                .get(&req.method)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
        );
        next.run(req, ctx).await
    }
}

/// Seam for distributed tracing integrations. Pass-through: an integration
/// replaces this with one that opens a span and writes trace/span ids into
/// the context bag (the log entry picks up `trace_id`/`span_id` from there).
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<JsonRpcResponse, HandlerError> {
        next.run(req, ctx).await
    }
}

/// Seam for authentication policy. Pass-through: deployments supply their
/// own check and short-circuit with an error response on failure.
pub struct AuthenticationMiddleware;

#[async_trait]
impl Middleware for AuthenticationMiddleware {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<JsonRpcResponse, HandlerError> {
        next.run(req, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RpcHandler;
    use polyrpc_json_rpc::RequestId;
    use serde_json::json;

    struct NullHandler;

    #[async_trait]
    impl RpcHandler for NullHandler {
        async fn handle(
            &self,
            req: &JsonRpcRequest,
            _ctx: &mut RequestContext,
        ) -> Result<JsonRpcResponse, HandlerError> {
            Ok(JsonRpcResponse::success(
                req.id.clone().unwrap_or(RequestId::Null),
                json!(null),
            ))
        }
    }

    #[tokio::test]
    async fn test_selection_records_mapped_name() {
        let middleware = HandlerSelectionMiddleware::new(HashMap::from([(
            "echo".to_string(),
            "EchoHandler".to_string(),
        )]));
        let chain = crate::middleware::Chain::new().with(std::sync::Arc::new(middleware));

        let req = JsonRpcRequest::new(1, "echo", None);
        let mut ctx = RequestContext::for_test("TCP");
        chain.execute(&req, &mut ctx, &NullHandler).await.unwrap();

        assert_eq!(ctx.selected_handler.as_deref(), Some("EchoHandler"));
    }

    #[tokio::test]
    async fn test_tracing_and_auth_seams_pass_through() {
        let chain = crate::middleware::Chain::new()
            .with(std::sync::Arc::new(TracingMiddleware))
            .with(std::sync::Arc::new(AuthenticationMiddleware));

        let req = JsonRpcRequest::new(1, "echo", None);
        let mut ctx = RequestContext::for_test("TCP");
        let resp = chain.execute(&req, &mut ctx, &NullHandler).await.unwrap();
        assert!(!resp.is_error());
        assert_eq!(resp.id, RequestId::from(1));
    }

    #[tokio::test]
    async fn test_selection_falls_back_to_unknown() {
        let middleware = HandlerSelectionMiddleware::new(HashMap::new());
        let chain = crate::middleware::Chain::new().with(std::sync::Arc::new(middleware));

        let req = JsonRpcRequest::new(1, "mystery", None);
        let mut ctx = RequestContext::for_test("TCP");
        chain.execute(&req, &mut ctx, &NullHandler).await.unwrap();

        assert_eq!(ctx.selected_handler.as_deref(), Some("unknown"));
    }
}
