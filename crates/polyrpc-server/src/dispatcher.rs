//! Request dispatch: registry lookup plus middleware chain execution.

use std::sync::{Arc, RwLock};

use polyrpc_json_rpc::{JsonRpcRequest, JsonRpcResponse, RequestId, RpcError};

use crate::context::RequestContext;
use crate::handler::{HandlerError, RpcHandler};
use crate::middleware::Chain;
use crate::registry::HandlerRegistry;

/// Routes a validated request to its registered handler through the
/// middleware chain. Stateless per call and safe for concurrent dispatch.
pub struct Dispatcher {
    registry: HandlerRegistry,
    // Replaced wholesale by set_chain; executing dispatches keep the Arc
    // they cloned, so a swap never tears a running chain.
    chain: RwLock<Arc<Chain>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            chain: RwLock::new(Arc::new(Chain::new())),
        }
    }

    pub fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.registry.register(method, handler);
    }

    pub fn unregister_handler(&self, method: &str) -> bool {
        self.registry.unregister(method)
    }

    /// Atomically replace the middleware chain.
    pub fn set_chain(&self, chain: Chain) {
        *self.chain.write().unwrap() = Arc::new(chain);
    }

    /// Snapshot of registered method names
    pub fn methods(&self) -> Vec<String> {
        self.registry.methods()
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Dispatch a validated request. A lookup miss is a well-formed
    /// method-not-found response, not a failure; `Err` is reserved for
    /// unstructured handler/middleware breakage.
    pub async fn dispatch(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        let Some(handler) = self.registry.lookup(&req.method) else {
            return Ok(JsonRpcResponse::error(
                req.id.clone().unwrap_or(RequestId::Null),
                RpcError::method_not_found(&format!("Method not found: {}", req.method)),
            ));
        };

        let chain = self.chain.read().unwrap().clone();
        chain.execute(req, ctx, handler.as_ref()).await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Middleware, Next};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct EchoBack;

    #[async_trait]
    impl RpcHandler for EchoBack {
        async fn handle(
            &self,
            req: &JsonRpcRequest,
            _ctx: &mut RequestContext,
        ) -> Result<JsonRpcResponse, HandlerError> {
            Ok(JsonRpcResponse::success(
                req.id.clone().unwrap_or(RequestId::Null),
                json!({"method": req.method}),
            ))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl RpcHandler for FailingHandler {
        async fn handle(
            &self,
            _req: &JsonRpcRequest,
            _ctx: &mut RequestContext,
        ) -> Result<JsonRpcResponse, HandlerError> {
            Err(HandlerError::new("intentional failure"))
        }
    }

    struct Recorder(Arc<Mutex<Vec<&'static str>>>, &'static str);

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(
            &self,
            req: &JsonRpcRequest,
            ctx: &mut RequestContext,
            next: Next<'_>,
        ) -> Result<JsonRpcResponse, HandlerError> {
            self.0.lock().unwrap().push(self.1);
            next.run(req, ctx).await
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("echo", Arc::new(EchoBack));

        let req = JsonRpcRequest::new(1, "echo", None);
        let mut ctx = RequestContext::for_test("TCP");

        let resp = dispatcher.dispatch(&req, &mut ctx).await.unwrap();
        assert_eq!(resp.id, RequestId::from(1));
        assert!(!resp.is_error());
    }

    #[tokio::test]
    async fn test_dispatch_method_not_found_echoes_id() {
        let dispatcher = Dispatcher::new();

        let req = JsonRpcRequest::new(7, "nope", None);
        let mut ctx = RequestContext::for_test("TCP");

        let resp = dispatcher.dispatch(&req, &mut ctx).await.unwrap();
        assert_eq!(resp.id, RequestId::from(7));
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_dispatch_handler_failure_propagates() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("boom", Arc::new(FailingHandler));

        let req = JsonRpcRequest::new(1, "boom", None);
        let mut ctx = RequestContext::for_test("TCP");

        let err = dispatcher.dispatch(&req, &mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "intentional failure");
    }

    #[tokio::test]
    async fn test_set_chain_swaps_atomically() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("m", Arc::new(EchoBack));

        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.set_chain(Chain::new().with(Arc::new(Recorder(log.clone(), "v1"))));

        let req = JsonRpcRequest::new(1, "m", None);
        let mut ctx = RequestContext::for_test("TCP");
        dispatcher.dispatch(&req, &mut ctx).await.unwrap();

        dispatcher.set_chain(Chain::new().with(Arc::new(Recorder(log.clone(), "v2"))));
        dispatcher.dispatch(&req, &mut ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["v1", "v2"]);
    }

    #[tokio::test]
    async fn test_unregister_restores_method_not_found() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("m", Arc::new(EchoBack));
        assert_eq!(dispatcher.handler_count(), 1);

        dispatcher.unregister_handler("m");

        let req = JsonRpcRequest::new(1, "m", None);
        let mut ctx = RequestContext::for_test("TCP");
        let resp = dispatcher.dispatch(&req, &mut ctx).await.unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }
}
