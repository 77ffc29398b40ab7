//! HTTP and HTTPS listeners.
//!
//! `POST /rpc` carries one envelope or batch; `GET /health` reports
//! liveness. JSON-RPC errors still travel as HTTP 200 — only
//! transport-level faults (wrong method, oversized body) use other status
//! codes. Notifications produce a 200 with an empty body.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use polyrpc_json_rpc::{JsonRpcResponse, RequestId, RpcError};

use crate::clock::Clock;
use crate::context::ProcessingContext;
use crate::health::health_response;
use crate::processor::Processor;

/// Apply the CORS headers every `/rpc` response carries.
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("Access-Control-Allow-Origin", "*".parse().unwrap());
    headers.insert("Access-Control-Allow-Methods", "POST, OPTIONS".parse().unwrap());
    headers.insert("Access-Control-Allow-Headers", "Content-Type".parse().unwrap());
}

/// Request handler shared by the HTTP and HTTPS listeners.
pub struct HttpEndpoint {
    processor: Arc<Processor>,
    clock: Arc<dyn Clock>,
    service_name: String,
    service_version: String,
    /// "HTTP" or "HTTPS"
    transport: &'static str,
    max_body_size: usize,
}

impl HttpEndpoint {
    pub fn new(
        processor: Arc<Processor>,
        clock: Arc<dyn Clock>,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        transport: &'static str,
        max_body_size: usize,
    ) -> Self {
        Self {
            processor,
            clock,
            service_name: service_name.into(),
            service_version: service_version.into(),
            transport,
            max_body_size,
        }
    }

    pub async fn handle<B>(
        &self,
        req: Request<B>,
        remote: SocketAddr,
        conn_token: &CancellationToken,
    ) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: std::fmt::Display,
    {
        let path = req.uri().path().to_string();
        match (path.as_str(), req.method()) {
            ("/rpc", _) => self.handle_rpc(req, remote, conn_token).await,
            ("/health", &Method::GET) => self.handle_health(),
            _ => plain(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    async fn handle_rpc<B>(
        &self,
        req: Request<B>,
        remote: SocketAddr,
        conn_token: &CancellationToken,
    ) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: std::fmt::Display,
    {
        let mut response = self.rpc_response(req, remote, conn_token).await;
        apply_cors_headers(response.headers_mut());
        response
    }

    async fn rpc_response<B>(
        &self,
        req: Request<B>,
        remote: SocketAddr,
        conn_token: &CancellationToken,
    ) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: std::fmt::Display,
    {
        match req.method() {
            &Method::POST => {}
            &Method::OPTIONS => return plain(StatusCode::OK, ""),
            _ => {
                let mut resp = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                resp.headers_mut()
                    .insert("Allow", "POST, OPTIONS".parse().unwrap());
                return resp;
            }
        }

        // Snapshot header metadata before the body consumes the request.
        let mut headers = HashMap::new();
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let user_agent = headers.get("user-agent").cloned();

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(error = %err, "failed to read request body");
                return plain(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        if body.len() > self.max_body_size {
            warn!(size = body.len(), "request body too large");
            return plain(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }

        if body.is_empty() {
            let resp = JsonRpcResponse::error(
                RequestId::Null,
                RpcError::invalid_request(Some(serde_json::Value::String(
                    "Request body cannot be empty".to_string(),
                ))),
            );
            return json(StatusCode::OK, serde_json::to_vec(&resp).unwrap_or_default());
        }

        let mut pctx = ProcessingContext::new(
            self.transport,
            remote.to_string(),
            self.service_name.clone(),
            self.service_version.clone(),
        )
        .with_headers(headers)
        .with_cancellation(conn_token.child_token());
        if let Some(user_agent) = user_agent {
            pctx = pctx.with_user_agent(user_agent);
        }

        let outcome = self.processor.process(&body, &pctx).await;
        match outcome.into_bytes() {
            // Notifications and all-notification batches: 200, empty body.
            Ok(None) => plain(StatusCode::OK, ""),
            Ok(Some(bytes)) => json(StatusCode::OK, bytes),
            Err(err) => {
                error!(error = %err, "failed to serialize response");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    fn handle_health(&self) -> Response<Full<Bytes>> {
        let body = health_response(
            &self.service_name,
            &self.service_version,
            self.clock.as_ref(),
        );
        json(StatusCode::OK, serde_json::to_vec(&body).unwrap_or_default())
    }
}

fn plain(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn json(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Accept loop for the HTTP listener; with `tls` set it becomes the HTTPS
/// listener. Each connection runs on its own task, and a connection's
/// cancellation token fires when the connection ends, cancelling any
/// in-flight request contexts derived from it.
pub async fn serve(
    listener: TcpListener,
    endpoint: Arc<HttpEndpoint>,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!(error = %err, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, transport = endpoint.transport, "new connection");

                let endpoint = Arc::clone(&endpoint);
                let tls = tls.clone();
                let conn_token = shutdown.child_token();
                tokio::spawn(async move {
                    let _cancel_on_close = conn_token.clone().drop_guard();
                    let service = service_fn({
                        let endpoint = Arc::clone(&endpoint);
                        let conn_token = conn_token.clone();
                        move |req| {
                            let endpoint = Arc::clone(&endpoint);
                            let conn_token = conn_token.clone();
                            async move {
                                Ok::<_, Infallible>(endpoint.handle(req, peer, &conn_token).await)
                            }
                        }
                    });

                    let served = match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                http1::Builder::new()
                                    .serve_connection(TokioIo::new(tls_stream), service)
                                    .await
                            }
                            Err(err) => {
                                warn!(peer = %peer, error = %err, "TLS handshake failed");
                                return;
                            }
                        },
                        None => {
                            http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .await
                        }
                    };

                    if let Err(err) = served {
                        let message = err.to_string();
                        if message.contains("connection closed before message completed") {
                            debug!(peer = %peer, "client disconnected");
                        } else {
                            warn!(peer = %peer, error = %message, "error serving connection");
                        }
                    }
                });
            }
        }
    }
    Ok(())
}
