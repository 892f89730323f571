//! JSON-RPC 2.0 envelope construction and the response-shape tagged union.
//!
//! Real upstreams answer in one of a handful of shapes. Rather than probing
//! the raw `serde_json::Value` ad hoc at every call site, every response
//! body is classified once into [`ResponseShape`] and callers match on the
//! tag.

use serde::Serialize;
use serde_json::Value;

/// An outbound JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Builds an envelope with a fixed `"jsonrpc":"2.0"` field.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", id, method: method.into(), params }
    }
}

/// The normalized shape of an upstream's JSON-RPC response.
#[derive(Debug, Clone)]
pub enum ResponseShape {
    /// `{..., "error": {"message": ..., ...}}`. `message` is extracted from
    /// `error.message` if present and a string, otherwise the whole `error`
    /// value is stringified.
    Error { message: String },
    /// `{..., "result": ...}`. `pending` is true iff
    /// `result.status == "pending"`.
    Result { value: Value, pending: bool },
    /// Anything else: a bare list, a bare scalar/object with neither
    /// `result` nor `error`, or (for legacy upstreams) the result value
    /// itself with no envelope at all.
    Bare(Value),
}

impl ResponseShape {
    /// Classifies a decoded JSON body into its response shape.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        if let Value::Object(ref map) = value {
            if let Some(err) = map.get("error") {
                let message = err
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                return ResponseShape::Error { message };
            }
            if let Some(result) = map.get("result") {
                let pending = result.get("status").and_then(Value::as_str) == Some("pending");
                return ResponseShape::Result { value: result.clone(), pending };
            }
        }
        ResponseShape::Bare(value)
    }
}

/// Decodes `bytes` as JSON, retrying once on a trimmed copy if the first
/// attempt fails. Tolerates framing quirks some upstreams exhibit (stray
/// leading/trailing whitespace, BOM-prefixed bodies).
///
/// # Errors
/// Returns the error from the second attempt if both fail.
pub fn parse_tolerant(bytes: &[u8]) -> serde_json::Result<Value> {
    match serde_json::from_slice(bytes) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            let trimmed = std::str::from_utf8(bytes)
                .map(|s| s.trim().trim_start_matches('\u{feff}'))
                .unwrap_or_default();
            if trimmed.is_empty() {
                return Err(first_err);
            }
            serde_json::from_str(trimmed)
        }
    }
}
