//! WebSocket and Secure WebSocket listeners.
//!
//! Upgrade at `/ws` (`/wss` on the TLS listener). Each text or binary
//! message is one envelope or batch; each non-silent result goes back as
//! one text frame. Close frames, write errors, and unexpected stream
//! errors end the session.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::context::ProcessingContext;
use crate::processor::Processor;

/// Parameters shared by every connection of one WebSocket listener.
#[derive(Clone)]
pub struct WsEndpoint {
    pub processor: Arc<Processor>,
    pub service_name: String,
    pub service_version: String,
    /// "WebSocket" or "Secure WebSocket"
    pub transport: &'static str,
    /// Upgrade path: "/ws" plain, "/wss" on the TLS listener
    pub path: &'static str,
}

/// Serve one upgraded WebSocket session.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    endpoint: WsEndpoint,
    conn_token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _cancel_on_close = conn_token.clone().drop_guard();

    let mut headers = HashMap::new();
    let expected_path = endpoint.path;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != expected_path {
            let mut reject = ErrorResponse::new(Some("Not Found".to_string()));
            *reject.status_mut() = StatusCode::NOT_FOUND;
            return Err(reject);
        }
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        Ok(resp)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(peer = %peer, error = %err, "WebSocket upgrade failed");
            return;
        }
    };

    let user_agent = headers.get("user-agent").cloned();
    let mut pctx = ProcessingContext::new(
        endpoint.transport,
        peer.to_string(),
        endpoint.service_name.clone(),
        endpoint.service_version.clone(),
    )
    .with_headers(headers)
    .with_cancellation(conn_token.clone());
    if let Some(user_agent) = user_agent {
        pctx = pctx.with_user_agent(user_agent);
    }

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = conn_token.cancelled() => break,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !respond(&endpoint, text.as_bytes(), &pctx, &mut sink, peer).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !respond(&endpoint, &data, &pctx, &mut sink, peer).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(peer = %peer, error = %err, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Process one message and transmit the result. Returns false when the
/// connection should close.
async fn respond<S>(
    endpoint: &WsEndpoint,
    payload: &[u8],
    pctx: &ProcessingContext,
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    peer: SocketAddr,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = endpoint.processor.process(payload, pctx).await;
    let bytes = match outcome.into_bytes() {
        // Notification: no frame at all.
        Ok(None) => return true,
        Ok(Some(bytes)) => bytes,
        Err(err) => {
            error!(peer = %peer, error = %err, "failed to serialize response");
            return false;
        }
    };

    let text = String::from_utf8_lossy(&bytes).into_owned();
    if let Err(err) = sink.send(Message::Text(text)).await {
        warn!(peer = %peer, error = %err, "write error");
        return false;
    }
    true
}

/// Accept loop for the WebSocket listener; with `tls` set it becomes the
/// Secure WebSocket listener.
pub async fn serve(
    listener: TcpListener,
    endpoint: WsEndpoint,
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

                let endpoint = endpoint.clone();
                let tls = tls.clone();
                let conn_token = shutdown.child_token();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                handle_connection(tls_stream, peer, endpoint, conn_token).await
                            }
                            Err(err) => {
                                warn!(peer = %peer, error = %err, "TLS handshake failed");
                            }
                        },
                        None => handle_connection(stream, peer, endpoint, conn_token).await,
                    }
                });
            }
        }
    }
    Ok(())
}
