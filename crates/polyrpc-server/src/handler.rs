//! Handler trait and adapters.

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use polyrpc_json_rpc::{JsonRpcRequest, JsonRpcResponse};

use crate::context::RequestContext;

/// Unstructured handler failure.
///
/// Handlers have two ways to fail: return a response whose `error` member
/// is set (structured, reaches the client as-is), or return this error
/// (unstructured, converted to a -32603 internal error at the processor
/// boundary).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// A registered JSON-RPC method implementation.
///
/// Handlers may be invoked concurrently from distinct tasks and must
/// synchronize any state of their own.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError>;
}

/// Adapter turning a plain async closure into an [`RpcHandler`].
///
/// ```rust,ignore
/// use futures::FutureExt;
/// let handler = FnHandler::new(|req, _ctx| {
///     async move { Ok(JsonRpcResponse::success(req.id.clone().unwrap(), json!("pong"))) }.boxed()
/// });
/// ```
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: for<'a> Fn(
            &'a JsonRpcRequest,
            &'a mut RequestContext,
        ) -> BoxFuture<'a, Result<JsonRpcResponse, HandlerError>>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> RpcHandler for FnHandler<F>
where
    F: for<'a> Fn(
            &'a JsonRpcRequest,
            &'a mut RequestContext,
        ) -> BoxFuture<'a, Result<JsonRpcResponse, HandlerError>>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
    ) -> Result<JsonRpcResponse, HandlerError> {
        (self.0)(req, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use polyrpc_json_rpc::RequestId;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let handler = FnHandler::new(|req, ctx| {
            ctx.set_value("seen", json!(true));
            let id = req.id.clone().unwrap_or(RequestId::Null);
            async move { Ok(JsonRpcResponse::success(id, json!("pong"))) }.boxed()
        });

        let req = JsonRpcRequest::new(1, "ping", None);
        let mut ctx = RequestContext::for_test("TCP");

        let resp = handler.handle(&req, &mut ctx).await.unwrap();
        assert_eq!(resp.result, Some(json!("pong")));
        assert_eq!(ctx.value("seen"), Some(&json!(true)));
    }
}
