//! # JSON-RPC 2.0 Protocol Types and Codec
//!
//! A pure, transport-agnostic JSON-RPC 2.0 protocol implementation. This
//! crate owns the wire envelopes, the error taxonomy, and the codec that
//! turns raw bytes into validated requests — and nothing else. Dispatch,
//! middleware, and transports live in `polyrpc-server`.
//!
//! ## Notification semantics
//!
//! A request whose `id` key is *absent* is a notification and must never
//! produce a response. A request whose `id` is an explicit JSON `null` is a
//! regular call that echoes `null` back. [`JsonRpcRequest`] preserves this
//! distinction: `id: None` means the key was absent, `Some(RequestId::Null)`
//! means it was present and null.

pub mod codec;
pub mod error;
pub mod request;
pub mod response;
pub mod types;

pub use codec::{classify, encode_response, parse_batch, parse_single, validate, PayloadKind};
pub use error::{JsonRpcErrorCode, RpcError};
pub use request::JsonRpcRequest;
pub use response::JsonRpcResponse;
pub use types::RequestId;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
