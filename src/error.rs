//! Error taxonomy for the hub.
//!
//! One `thiserror` enum covers every failure mode the hub core can surface.
//! Dispatch failures (`UnknownTool`, `ServerUnavailable`, `UpstreamError`,
//! `TransportError`, `FramingError`) are normally wrapped in
//! [`crate::model::CallOutcome::Failure`] rather than returned as `Err`,
//! see that type's docs. `BadConfig` is the one variant that genuinely
//! propagates as an `Err` from the config loader.

use thiserror::Error;

/// Result type used throughout the hub core.
pub type Result<T> = std::result::Result<T, HubError>;

/// Taxonomy of errors the hub core can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Malformed or ambiguous config: parse failure, duplicate name, missing
    /// `name`/`endpoint`, or non-positive timeout.
    #[error("bad config: {0}")]
    BadConfig(String),

    /// Qualified tool name has no registry entry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The owning upstream is not in the `Connected` state at dispatch time.
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    /// The upstream returned a JSON-RPC `error` object; message is surfaced verbatim.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// HTTP/socket failure, timeout, non-200 on unary, or mid-stream failure.
    #[error("transport error: {0}")]
    TransportError(String),

    /// A streamed chunk could neither be parsed nor forwarded unparsed.
    #[error("framing error: {0}")]
    FramingError(String),

    /// Catch-all for conditions that don't fit the taxonomy above.
    #[error("{0}")]
    Other(String),
}

impl HubError {
    /// Short, stable name for the error's taxonomy kind (used in logs and tests).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::BadConfig(_) => "BadConfig",
            HubError::UnknownTool(_) => "UnknownTool",
            HubError::ServerUnavailable(_) => "ServerUnavailable",
            HubError::UpstreamError(_) => "UpstreamError",
            HubError::TransportError(_) => "TransportError",
            HubError::FramingError(_) => "FramingError",
            HubError::Other(_) => "Other",
        }
    }
}
