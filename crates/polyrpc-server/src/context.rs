//! Per-call context types.
//!
//! [`ProcessingContext`] is what a transport hands the processor along with
//! the raw bytes: provenance only. [`RequestContext`] is the richer
//! per-request bundle the processor builds from it after parse success —
//! identity, timing, headers, the middleware bag, and the cancellation
//! handle inherited from the connection.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};

/// Minimal per-call data a transport must supply.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    /// Transport label ("HTTP", "TCP", "WebSocket", ...)
    pub transport: String,
    /// Peer address as reported by the listener
    pub remote_addr: String,
    pub service_name: String,
    pub service_version: String,
    /// Header map for HTTP-like transports; empty otherwise
    pub headers: HashMap<String, String>,
    pub user_agent: Option<String>,
    /// Cancelled when the client disconnects or the server stops
    pub cancel: CancellationToken,
}

impl ProcessingContext {
    pub fn new(
        transport: impl Into<String>,
        remote_addr: impl Into<String>,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
    ) -> Self {
        Self {
            transport: transport.into(),
            remote_addr: remote_addr.into(),
            service_name: service_name.into(),
            service_version: service_version.into(),
            headers: HashMap::new(),
            user_agent: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Request-scoped metadata created once per parsed request.
///
/// Owned mutably by the single task driving the call; middleware and the
/// handler communicate through `selected_handler` and the freeform bag.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub transport: String,
    pub remote_addr: String,
    pub started_at: DateTime<Utc>,
    started_instant: Instant,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
    /// Written by handler-selection middleware, read by the log entry
    pub selected_handler: Option<String>,
    data: HashMap<String, Value>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl RequestContext {
    pub fn new(
        transport: impl Into<String>,
        remote_addr: impl Into<String>,
        request_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        let started_instant = clock.instant();
        Self {
            request_id: request_id.into(),
            transport: transport.into(),
            remote_addr: remote_addr.into(),
            started_at,
            started_instant,
            user_agent: None,
            headers: HashMap::new(),
            selected_handler: None,
            data: HashMap::new(),
            cancel: CancellationToken::new(),
            clock,
        }
    }

    /// Convenience constructor for tests: system clock, fixed id.
    pub fn for_test(transport: &str) -> Self {
        Self::new(transport, "127.0.0.1:0", "test-request-id", Arc::new(SystemClock))
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Store a value in the freeform bag
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Read a value from the freeform bag
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Snapshot of the whole bag (bounded copies are the logger's concern)
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    /// Time elapsed since the request started, measured against the
    /// injected clock's monotonic reading
    pub fn duration(&self) -> Duration {
        self.clock
            .instant()
            .saturating_duration_since(self.started_instant)
    }

    /// Cancellation handle inherited from the transport connection
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("transport", &self.transport)
            .field("remote_addr", &self.remote_addr)
            .field("started_at", &self.started_at)
            .field("selected_handler", &self.selected_handler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_bag_round_trip() {
        let mut ctx = RequestContext::for_test("TCP");
        ctx.set_value("user", json!("alice"));

        assert_eq!(ctx.value("user"), Some(&json!("alice")));
        assert_eq!(ctx.value("missing"), None);
    }

    #[test]
    fn test_duration_uses_injected_clock() {
        let clock = Arc::new(MockClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let ctx = RequestContext::new("HTTP", "10.0.0.1:1234", "abc", clock.clone());

        clock.advance(Duration::from_millis(250));
        assert_eq!(ctx.duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_cancellation_propagates_from_transport_token() {
        let token = CancellationToken::new();
        let ctx = RequestContext::for_test("WebSocket").with_cancellation(token.clone());

        assert!(!ctx.cancellation().is_cancelled());
        token.cancel();
        assert!(ctx.cancellation().is_cancelled());
    }
}
