use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::RequestId;

/// A JSON-RPC 2.0 request envelope.
///
/// `id` distinguishes absent from explicit null: `None` means the `id` key
/// was not present (the request is a notification), `Some(RequestId::Null)`
/// means the client sent `"id": null` and expects a response echoing null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Defaults to empty when absent so shape problems surface as
    /// invalid-request during validation rather than as parse errors.
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "deserialize_present_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<RequestId>,
}

/// Invoked only when the `id` key is present, so an explicit null becomes
/// `Some(RequestId::Null)` while an absent key falls back to the `None`
/// default.
fn deserialize_present_id<'de, D>(deserializer: D) -> Result<Option<RequestId>, D::Error>
where
    D: Deserializer<'de>,
{
    RequestId::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: crate::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    /// Create a notification (no id, no response expected)
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: crate::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// A request without an id key is a notification and must not produce a
    /// response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Get a named parameter (when params are an object)
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }
}
