//! TCP and TLS stream listeners.
//!
//! The wire is a stream of JSON values — newline-separated or simply
//! concatenated. Each value is one envelope or batch; each non-silent
//! result is written back as one line. A connection serves sequential
//! calls until clean EOF; any other read or decode failure is logged at
//! warn and the connection closed.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::context::ProcessingContext;
use crate::processor::Processor;

/// Parameters shared by every connection of one listener.
#[derive(Clone)]
pub struct StreamEndpoint {
    pub processor: Arc<Processor>,
    pub service_name: String,
    pub service_version: String,
    /// "TCP" or "TLS"
    pub transport: &'static str,
    pub idle_timeout: Duration,
}

/// Locate one complete JSON value at the front of `buf`.
///
/// Returns the `(start, end)` byte range of the value, `Ok(None)` when the
/// buffered bytes are only a prefix of a value (read more), and `Err` when
/// the stream cannot be a JSON value at all (close the connection — there
/// is no way to resynchronize).
fn extract_value(buf: &[u8]) -> Result<Option<(usize, usize)>, serde_json::Error> {
    let Some(start) = buf.iter().position(|b| !b.is_ascii_whitespace()) else {
        return Ok(None);
    };

    let mut values = serde_json::Deserializer::from_slice(&buf[start..])
        .into_iter::<serde::de::IgnoredAny>();
    match values.next() {
        Some(Ok(_)) => Ok(Some((start, start + values.byte_offset()))),
        Some(Err(err)) if err.is_eof() => Ok(None),
        Some(Err(err)) => Err(err),
        None => Ok(None),
    }
}

/// Serve one established stream (TCP socket or TLS session).
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    endpoint: StreamEndpoint,
    conn_token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _cancel_on_close = conn_token.clone().drop_guard();

    let pctx = ProcessingContext::new(
        endpoint.transport,
        peer.to_string(),
        endpoint.service_name.clone(),
        endpoint.service_version.clone(),
    )
    .with_cancellation(conn_token.clone());

    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        // Drain every complete value already buffered.
        loop {
            match extract_value(&buf) {
                Ok(Some((start, end))) => {
                    let frame = buf.split_to(end);
                    let outcome = endpoint.processor.process(&frame[start..], &pctx).await;

                    let bytes = match outcome.into_bytes() {
                        Ok(None) => continue,
                        Ok(Some(bytes)) => bytes,
                        Err(err) => {
                            error!(peer = %peer, error = %err, "failed to serialize response");
                            return;
                        }
                    };

                    if let Err(err) = write_line(&mut stream, &bytes).await {
                        warn!(peer = %peer, error = %err, "write error");
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "stream decode error");
                    return;
                }
            }
        }

        // Need more bytes for the next value.
        let read = tokio::select! {
            _ = conn_token.cancelled() => return,
            read = tokio::time::timeout(endpoint.idle_timeout, stream.read_buf(&mut buf)) => read,
        };

        match read {
            Err(_) => {
                debug!(peer = %peer, "connection idle, closing");
                return;
            }
            Ok(Ok(0)) => {
                if buf.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!(peer = %peer, "EOF with incomplete value");
                }
                return;
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(peer = %peer, error = %err, "read error");
                return;
            }
        }
    }
}

async fn write_line<S>(stream: &mut S, bytes: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}

/// Accept loop for the TCP listener; with `tls` set it becomes the TLS
/// listener.
pub async fn serve(
    listener: TcpListener,
    endpoint: StreamEndpoint,
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
