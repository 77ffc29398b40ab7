//! Health endpoint payload.

use serde_json::{json, Value};

use crate::clock::Clock;

/// Body served for `GET /health` on the HTTP-family listeners.
pub fn health_response(service: &str, version: &str, clock: &dyn Clock) -> Value {
    json!({
        "status": "healthy",
        "timestamp": clock.now().to_rfc3339(),
        "service": service,
        "version": version,
    })
}
