//! Logging middleware: observes the call's outcome and ships a structured
//! entry through the async pipeline without touching the response.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use polyrpc_json_rpc::{JsonRpcRequest, JsonRpcResponse};

use crate::context::RequestContext;
use crate::handler::HandlerError;
use crate::logging::Logger;
use crate::middleware::{Middleware, Next};

pub struct LoggingMiddleware {
    logger: Arc<Logger>,
}

impl LoggingMiddleware {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: &JsonRpcRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<JsonRpcResponse, HandlerError> {
        let result = next.run(req, ctx).await;

        let (response, failure) = match &result {
            Ok(response) => (Some(response), None),
            Err(failure) => (None, Some(failure)),
        };
        let success = failure.is_none() && response.map_or(true, |r| !r.is_error());
        let has_error = failure.is_some() || response.map_or(false, |r| r.is_error());

        if self.logger.should_log(req, success, has_error) {
            // Submission failure means the pipeline is draining; the call
            // itself is unaffected.
            if let Err(err) = self.logger.submit(req, ctx, response, failure) {
                debug!(error = %err, method = %req.method, "log submission rejected");
            }
        }

        result
    }
}
