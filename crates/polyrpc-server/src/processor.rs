//! Top-level request orchestration.
//!
//! The processor is the single entry point every transport calls: it runs
//! the codec, builds the per-request context, routes through the
//! dispatcher, and shapes the response (version and id echo, notification
//! silence, internal-error wrapping). It holds no per-call state and is
//! safe for concurrent invocation.

use serde_json::{json, Value};
use std::sync::Arc;

use polyrpc_json_rpc::{
    codec, JsonRpcRequest, JsonRpcResponse, PayloadKind, RequestId, RpcError, JSONRPC_VERSION,
};

use crate::clock::Clock;
use crate::context::{ProcessingContext, RequestContext};
use crate::dispatcher::Dispatcher;
use crate::id::IdGenerator;

/// What a transport should transmit for one delivered payload.
#[derive(Debug)]
pub enum Outcome {
    /// One response envelope
    Single(JsonRpcResponse),
    /// Batch responses, in input order, notifications suppressed
    Batch(Vec<JsonRpcResponse>),
    /// Nothing: a notification or an all-notification batch
    Silent,
}

impl Outcome {
    /// Serialize for the wire; `None` means write nothing at all.
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        match self {
            Outcome::Single(resp) => codec::encode_response(&resp).map(Some),
            Outcome::Batch(responses) => serde_json::to_vec(&responses).map(Some),
            Outcome::Silent => Ok(None),
        }
    }

    pub fn is_silent(&self) -> bool {
        matches!(self, Outcome::Silent)
    }
}

pub struct Processor {
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Processor {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            dispatcher,
            clock,
            ids,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Classify the payload and route it. This is the call every transport
    /// makes after reading one message.
    pub async fn process(&self, bytes: &[u8], pctx: &ProcessingContext) -> Outcome {
        match codec::classify(bytes) {
            PayloadKind::Batch => self.process_batch(bytes, pctx).await,
            PayloadKind::Single => match self.process_single(bytes, pctx).await {
                Some(resp) => Outcome::Single(resp),
                None => Outcome::Silent,
            },
        }
    }

    /// Process one request envelope. `None` means the request was a
    /// notification and nothing must be transmitted.
    pub async fn process_single(
        &self,
        bytes: &[u8],
        pctx: &ProcessingContext,
    ) -> Option<JsonRpcResponse> {
        // Step 1: parse. The id is unknown, so the error echoes null.
        let req = match codec::parse_single(bytes) {
            Ok(req) => req,
            Err(err) => return Some(JsonRpcResponse::error(RequestId::Null, err)),
        };

        // Step 2: structural validation. The id is echoed even for invalid
        // envelopes (null when the key was absent).
        if let Err(err) = codec::validate(&req) {
            let id = req.id.clone().unwrap_or(RequestId::Null);
            return Some(JsonRpcResponse::error(id, err));
        }

        // Step 3: notifications dispatch but never answer.
        if req.is_notification() {
            let mut ctx = self.build_context(&req, pctx);
            let _ = self.dispatcher.dispatch(&req, &mut ctx).await;
            return None;
        }

        // Step 4: regular call.
        let mut ctx = self.build_context(&req, pctx);
        let id = req.id.clone().unwrap_or(RequestId::Null);

        match self.dispatcher.dispatch(&req, &mut ctx).await {
            Ok(mut resp) => {
                // The handler owns result/error; the envelope identity is
                // ours to enforce.
                resp.jsonrpc = JSONRPC_VERSION.to_string();
                resp.id = id;
                Some(resp)
            }
            Err(failure) => Some(JsonRpcResponse::error(
                id,
                RpcError::internal_error(Some(Value::String(format!(
                    "Dispatcher error: {}",
                    failure
                )))),
            )),
        }
    }

    /// Process a batch payload. Parse failure and the empty batch produce a
    /// single error response; otherwise non-notification responses are
    /// collected in input order.
    pub async fn process_batch(&self, bytes: &[u8], pctx: &ProcessingContext) -> Outcome {
        let elements = match codec::parse_batch(bytes) {
            Ok(elements) => elements,
            Err(err) => return Outcome::Single(JsonRpcResponse::error(RequestId::Null, err)),
        };

        if elements.is_empty() {
            return Outcome::Single(JsonRpcResponse::error(
                RequestId::Null,
                RpcError::invalid_request(Some(Value::String(
                    "Batch request cannot be empty".to_string(),
                ))),
            ));
        }

        let mut responses = Vec::with_capacity(elements.len());
        for element in &elements {
            if let Some(resp) = self.process_single(element.get().as_bytes(), pctx).await {
                responses.push(resp);
            }
        }

        if responses.is_empty() {
            Outcome::Silent
        } else {
            Outcome::Batch(responses)
        }
    }

    fn build_context(&self, req: &JsonRpcRequest, pctx: &ProcessingContext) -> RequestContext {
        let mut ctx = RequestContext::new(
            pctx.transport.clone(),
            pctx.remote_addr.clone(),
            self.ids.generate(),
            Arc::clone(&self.clock),
        )
        .with_cancellation(pctx.cancel.child_token());

        ctx.headers = pctx.headers.clone();
        ctx.user_agent = pctx.user_agent.clone();
        ctx.set_value("transport", json!(pctx.transport));
        ctx.set_value("service_version", json!(pctx.service_version));
        ctx.set_value("method", json!(req.method));
        ctx
    }
}
