//! Server lifecycle: listener wiring, default handlers, graceful shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::handler::RpcHandler;
use crate::handlers::{CalculateHandler, EchoHandler, SlowHandler, StatusHandler, TimeHandler};
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::logging::Logger;
use crate::middleware::{Chain, HandlerSelectionMiddleware, LoggingMiddleware};
use crate::pipeline::TaskPipeline;
use crate::processor::Processor;
use crate::transport::{http, labels, tcp, tls, ws};
use crate::Result;

/// Default deadline for draining the async pipeline on stop.
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// The multi-transport JSON-RPC server.
///
/// One shared [`Processor`] serves every configured listener; stopping the
/// server cancels the accept loops and all in-flight request contexts,
/// then drains the logging pipeline within a deadline.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    processor: Arc<Processor>,
    logger: Arc<Logger>,
    pipeline: Arc<dyn TaskPipeline>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    bound: Mutex<Vec<(&'static str, SocketAddr)>>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        logger: Arc<Logger>,
        pipeline: Arc<dyn TaskPipeline>,
    ) -> Self {
        Self::with_dependencies(
            config,
            logger,
            pipeline,
            Arc::new(SystemClock),
            Arc::new(RandomIdGenerator::default()),
        )
    }

    /// Full dependency injection, used by tests to control time and ids.
    pub fn with_dependencies(
        config: ServerConfig,
        logger: Arc<Logger>,
        pipeline: Arc<dyn TaskPipeline>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new());

        let handler_names = HashMap::from([
            ("echo".to_string(), "EchoHandler".to_string()),
            ("calculate".to_string(), "CalculateHandler".to_string()),
            ("time".to_string(), "TimeHandler".to_string()),
            ("status".to_string(), "StatusHandler".to_string()),
            ("test_slow".to_string(), "SlowHandler".to_string()),
        ]);
        dispatcher.set_chain(
            Chain::new()
                .with(Arc::new(HandlerSelectionMiddleware::new(handler_names)))
                .with(Arc::new(LoggingMiddleware::new(Arc::clone(&logger)))),
        );

        dispatcher.register_handler("echo", Arc::new(EchoHandler::new(clock.clone())));
        dispatcher.register_handler("calculate", Arc::new(CalculateHandler));
        dispatcher.register_handler("time", Arc::new(TimeHandler::new(clock.clone())));
        dispatcher.register_handler(
            "status",
            Arc::new(StatusHandler::new(
                clock.clone(),
                config.service_version.clone(),
            )),
        );
        dispatcher.register_handler("test_slow", Arc::new(SlowHandler::new(clock.clone())));

        let processor = Arc::new(Processor::new(
            Arc::clone(&dispatcher),
            clock.clone(),
            ids,
        ));

        Self {
            config,
            dispatcher,
            processor,
            logger,
            pipeline,
            clock,
            shutdown: CancellationToken::new(),
            bound: Mutex::new(Vec::new()),
        }
    }

    pub fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.dispatcher.register_handler(method, handler);
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Addresses actually bound by `start`, useful when configured with
    /// port 0.
    pub fn bound_addrs(&self) -> Vec<(&'static str, SocketAddr)> {
        self.bound.lock().unwrap().clone()
    }

    /// Bind and spawn every configured listener. TLS-family listeners are
    /// skipped with a warning when certificate material is missing or
    /// unloadable.
    pub async fn start(&self) -> Result<()> {
        let acceptor = self.load_tls();

        if let Some(addr) = self.config.http_addr {
            let listener = self.bind(labels::HTTP, addr).await?;
            let endpoint = Arc::new(self.http_endpoint(labels::HTTP));
            tokio::spawn(http::serve(listener, endpoint, None, self.shutdown.clone()));
        }

        if let Some(addr) = self.config.https_addr {
            if let Some(acceptor) = acceptor.clone() {
                let listener = self.bind(labels::HTTPS, addr).await?;
                let endpoint = Arc::new(self.http_endpoint(labels::HTTPS));
                tokio::spawn(http::serve(
                    listener,
                    endpoint,
                    Some(acceptor),
                    self.shutdown.clone(),
                ));
            }
        }

        if let Some(addr) = self.config.tcp_addr {
            let listener = self.bind(labels::TCP, addr).await?;
            tokio::spawn(tcp::serve(
                listener,
                self.stream_endpoint(labels::TCP),
                None,
                self.shutdown.clone(),
            ));
        }

        if let Some(addr) = self.config.tls_addr {
            if let Some(acceptor) = acceptor.clone() {
                let listener = self.bind(labels::TLS, addr).await?;
                tokio::spawn(tcp::serve(
                    listener,
                    self.stream_endpoint(labels::TLS),
                    Some(acceptor),
                    self.shutdown.clone(),
                ));
            }
        }

        if let Some(addr) = self.config.ws_addr {
            let listener = self.bind(labels::WEBSOCKET, addr).await?;
            tokio::spawn(ws::serve(
                listener,
                self.ws_endpoint(labels::WEBSOCKET, "/ws"),
                None,
                self.shutdown.clone(),
            ));
        }

        if let Some(addr) = self.config.wss_addr {
            if let Some(acceptor) = acceptor {
                let listener = self.bind(labels::SECURE_WEBSOCKET, addr).await?;
                tokio::spawn(ws::serve(
                    listener,
                    self.ws_endpoint(labels::SECURE_WEBSOCKET, "/wss"),
                    Some(acceptor),
                    self.shutdown.clone(),
                ));
            }
        }

        Ok(())
    }

    /// Stop with the default 10 s drain deadline.
    pub async fn stop(&self) -> Result<()> {
        self.stop_with_deadline(DEFAULT_DRAIN_DEADLINE).await
    }

    /// Stop accepting connections, cancel in-flight request contexts, and
    /// drain the async pipeline within `deadline`.
    pub async fn stop_with_deadline(&self, deadline: Duration) -> Result<()> {
        info!("stopping server");
        self.shutdown.cancel();
        let drained = self.pipeline.shutdown(deadline).await;
        self.logger.close().await;
        drained?;
        Ok(())
    }

    fn load_tls(&self) -> Option<TlsAcceptor> {
        let wants_tls = self.config.https_addr.is_some()
            || self.config.tls_addr.is_some()
            || self.config.wss_addr.is_some();
        if !wants_tls {
            return None;
        }

        let (Some(cert), Some(key)) = (
            self.config.tls_cert_path.as_ref(),
            self.config.tls_key_path.as_ref(),
        ) else {
            warn!("TLS certificates not configured; HTTPS, TLS, and WSS listeners disabled");
            return None;
        };

        match tls::load_acceptor(cert, key) {
            Ok(acceptor) => {
                info!(cert = %cert.display(), "TLS certificates loaded");
                Some(acceptor)
            }
            Err(err) => {
                warn!(error = %err, "failed to load TLS certificates; HTTPS, TLS, and WSS listeners disabled");
                None
            }
        }
    }

    async fn bind(&self, label: &'static str, addr: SocketAddr) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(transport = label, addr = %local, "listener started");
        self.bound.lock().unwrap().push((label, local));
        Ok(listener)
    }

    fn http_endpoint(&self, label: &'static str) -> http::HttpEndpoint {
        http::HttpEndpoint::new(
            Arc::clone(&self.processor),
            self.clock.clone(),
            self.config.service_name.clone(),
            self.config.service_version.clone(),
            label,
            self.config.max_body_size,
        )
    }

    fn stream_endpoint(&self, label: &'static str) -> tcp::StreamEndpoint {
        tcp::StreamEndpoint {
            processor: Arc::clone(&self.processor),
            service_name: self.config.service_name.clone(),
            service_version: self.config.service_version.clone(),
            transport: label,
            idle_timeout: self.config.idle_timeout,
        }
    }

    fn ws_endpoint(&self, label: &'static str, path: &'static str) -> ws::WsEndpoint {
        ws::WsEndpoint {
            processor: Arc::clone(&self.processor),
            service_name: self.config.service_name.clone(),
            service_version: self.config.service_version.clone(),
            transport: label,
            path,
        }
    }
}
