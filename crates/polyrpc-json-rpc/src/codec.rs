//! Byte-level codec: classification, parsing, validation, and encoding of
//! JSON-RPC 2.0 envelopes.

use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::RpcError;
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcResponse;

/// Shape of an incoming payload, decided without a full parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Single,
    Batch,
}

/// Classify a payload by its first non-whitespace byte: `[` means batch,
/// anything else (including an empty payload) is treated as a single
/// request and left to the parser to reject.
pub fn classify(bytes: &[u8]) -> PayloadKind {
    for &b in bytes {
        if b.is_ascii_whitespace() {
            continue;
        }
        return if b == b'[' {
            PayloadKind::Batch
        } else {
            PayloadKind::Single
        };
    }
    PayloadKind::Single
}

/// Parse one request envelope. Anything that does not parse as a JSON
/// object of the right shape is a parse error (-32700) with the serde
/// detail carried in `data`.
pub fn parse_single(bytes: &[u8]) -> Result<JsonRpcRequest, RpcError> {
    serde_json::from_slice(bytes).map_err(|err| {
        RpcError::parse_error(Some(Value::String(format!("Invalid JSON: {}", err))))
    })
}

/// Parse a batch into raw elements. Each element is re-parsed individually
/// by the processor so one malformed element cannot poison its siblings.
/// An empty array parses fine here — rejecting it is the processor's
/// invalid-request, not a parse error.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<Box<RawValue>>, RpcError> {
    serde_json::from_slice(bytes).map_err(|err| {
        RpcError::parse_error(Some(Value::String(format!(
            "Invalid JSON in batch request: {}",
            err
        ))))
    })
}

/// Validate a parsed envelope against JSON-RPC 2.0 structural rules.
pub fn validate(req: &JsonRpcRequest) -> Result<(), RpcError> {
    if req.jsonrpc != crate::JSONRPC_VERSION {
        return Err(RpcError::invalid_request(Some(Value::String(
            "JSON-RPC version must be '2.0'".to_string(),
        ))));
    }

    if req.method.is_empty() {
        return Err(RpcError::invalid_request(Some(Value::String(
            "Method is required and cannot be empty".to_string(),
        ))));
    }

    // The rpc. prefix is reserved by the specification; no reserved
    // built-ins are recognized, so everything under it is unknown.
    if req.method.starts_with("rpc.") {
        return Err(RpcError::method_not_found(&format!(
            "{} (reserved method prefix)",
            req.method
        )));
    }

    Ok(())
}

/// Encode a response envelope to bytes.
pub fn encode_response(resp: &JsonRpcResponse) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;

    #[test]
    fn test_classify() {
        assert_eq!(classify(b"{\"jsonrpc\":\"2.0\"}"), PayloadKind::Single);
        assert_eq!(classify(b"[{},{}]"), PayloadKind::Batch);
        assert_eq!(classify(b"  \t\n[1]"), PayloadKind::Batch);
        assert_eq!(classify(b"  \"x\""), PayloadKind::Single);
        assert_eq!(classify(b""), PayloadKind::Single);
    }

    #[test]
    fn test_parse_single_rejects_bad_json() {
        let err = parse_single(b"{bad}").unwrap_err();
        assert_eq!(err.code, crate::error_codes::PARSE_ERROR);
    }

    #[test]
    fn test_parse_single_preserves_null_id() {
        let req = parse_single(br#"{"jsonrpc":"2.0","method":"m","id":null}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Null));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_parse_batch() {
        let elements = parse_batch(br#"[{"a":1}, {"b":2}]"#).unwrap();
        assert_eq!(elements.len(), 2);

        let err = parse_batch(b"{}").unwrap_err();
        assert_eq!(err.code, crate::error_codes::PARSE_ERROR);

        // Empty arrays are valid here; the processor rejects them.
        assert!(parse_batch(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_validate_version() {
        let req = parse_single(br#"{"jsonrpc":"1.0","method":"m","id":1}"#).unwrap();
        let err = validate(&req).unwrap_err();
        assert_eq!(err.code, crate::error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_validate_missing_method() {
        let req = parse_single(br#"{"jsonrpc":"2.0","method":"","id":1}"#).unwrap();
        let err = validate(&req).unwrap_err();
        assert_eq!(err.code, crate::error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_object_without_envelope_fields_is_invalid_request_not_parse_error() {
        // A well-formed JSON object parses; the missing version and method
        // are validation failures.
        let req = parse_single(br#"{"a":1}"#).unwrap();
        let err = validate(&req).unwrap_err();
        assert_eq!(err.code, crate::error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_validate_reserved_prefix() {
        let req = parse_single(br#"{"jsonrpc":"2.0","method":"rpc.discover","id":1}"#).unwrap();
        let err = validate(&req).unwrap_err();
        assert_eq!(err.code, crate::error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_validate_ok() {
        let req = parse_single(br#"{"jsonrpc":"2.0","method":"echo","id":1}"#).unwrap();
        assert!(validate(&req).is_ok());
    }
}
