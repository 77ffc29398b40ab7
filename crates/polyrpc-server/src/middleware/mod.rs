//! Middleware chain.
//!
//! A middleware wraps dispatch with pre/post logic. The chain executes as a
//! classic onion: pre-work in registration order, post-work in reverse. A
//! middleware that returns without invoking [`Next`] short-circuits the
//! chain and its return value becomes the call's result.

mod logging;
mod selection;

pub use logging::LoggingMiddleware;
pub use selection::{AuthenticationMiddleware, HandlerSelectionMiddleware, TracingMiddleware};

use async_trait::async_trait;
use std::sync::Arc;

use polyrpc_json_rpc::{JsonRpcRequest, JsonRpcResponse};

use crate::context::RequestContext;
use crate::handler::{HandlerError, RpcHandler};

/// A link in the middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle the request, usually by calling `next.run(req, ctx)` and
    /// inspecting or transforming its result. Not calling `next` is a
    /// legitimate short-circuit.
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<JsonRpcResponse, HandlerError>;
}

/// Continuation representing the remainder of the chain plus the terminal
/// handler.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn RpcHandler,
}

impl<'a> Next<'a> {
    /// Invoke the rest of the chain.
    pub async fn run(
        self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        match self.remaining.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        req,
                        ctx,
                        Next {
                            remaining: rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => self.terminal.handle(req, ctx).await,
        }
    }
}

/// Ordered sequence of middleware.
///
/// Immutable once dispatch starts; the dispatcher replaces a chain by
/// swapping the whole `Arc`.
#[derive(Default, Clone)]
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the chain with `handler` as the terminal link.
    pub async fn execute(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
        handler: &dyn RpcHandler,
    ) -> Result<JsonRpcResponse, HandlerError> {
        Next {
            remaining: &self.middlewares,
            terminal: handler,
        }
        .run(req, ctx)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyrpc_json_rpc::{RequestId, RpcError};
    use serde_json::json;
    use std::sync::Mutex;

    struct TerminalHandler;

    #[async_trait]
    impl RpcHandler for TerminalHandler {
        async fn handle(
            &self,
            req: &JsonRpcRequest,
            _ctx: &mut RequestContext,
        ) -> Result<JsonRpcResponse, HandlerError> {
            Ok(JsonRpcResponse::success(
                req.id.clone().unwrap_or(RequestId::Null),
                json!("terminal"),
            ))
        }
    }

    struct OrderRecorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for OrderRecorder {
        async fn handle(
            &self,
            req: &JsonRpcRequest,
            ctx: &mut RequestContext,
            next: Next<'_>,
        ) -> Result<JsonRpcResponse, HandlerError> {
            self.log.lock().unwrap().push(format!("pre_{}", self.name));
            let result = next.run(req, ctx).await;
            self.log.lock().unwrap().push(format!("post_{}", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(
            &self,
            req: &JsonRpcRequest,
            _ctx: &mut RequestContext,
            _next: Next<'_>,
        ) -> Result<JsonRpcResponse, HandlerError> {
            Ok(JsonRpcResponse::error(
                req.id.clone().unwrap_or(RequestId::Null),
                RpcError::server_error(-32000, "short-circuited", None),
            ))
        }
    }

    fn request() -> JsonRpcRequest {
        JsonRpcRequest::new(1, "m", None)
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler_directly() {
        let chain = Chain::new();
        let mut ctx = RequestContext::for_test("TCP");
        let resp = chain
            .execute(&request(), &mut ctx, &TerminalHandler)
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!("terminal")));
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new()
            .with(Arc::new(OrderRecorder {
                name: "first",
                log: log.clone(),
            }))
            .with(Arc::new(OrderRecorder {
                name: "second",
                log: log.clone(),
            }));

        let mut ctx = RequestContext::for_test("TCP");
        chain
            .execute(&request(), &mut ctx, &TerminalHandler)
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre_first", "pre_second", "post_second", "post_first"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest_of_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new()
            .with(Arc::new(ShortCircuit))
            .with(Arc::new(OrderRecorder {
                name: "unreached",
                log: log.clone(),
            }));

        let mut ctx = RequestContext::for_test("TCP");
        let resp = chain
            .execute(&request(), &mut ctx, &TerminalHandler)
            .await
            .unwrap();

        assert!(resp.is_error());
        assert_eq!(resp.error.unwrap().code, -32000);
        assert!(log.lock().unwrap().is_empty());
    }
}
