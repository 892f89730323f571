//! Core data model shared across the hub: upstream descriptors, tool
//! registry entries, and the outcome of a dispatched call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;

/// Default timeout applied to a descriptor that omits one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Immutable config row for one upstream.
///
/// Invariant: `name` is non-empty and distinct across the live set (enforced
/// by the config loader, not by this type itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamDescriptor {
    /// Unique name within the hub. Must not contain `.` (used as the
    /// qualifier in `"{name}.{tool}"`).
    pub name: String,
    /// Absolute URL accepting JSON-RPC POSTs.
    pub endpoint: String,
    /// Whether the hub should maintain a live connection to this upstream.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Request timeout in seconds, must be >= 1.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl UpstreamDescriptor {
    /// Validates the invariants required of a descriptor.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.name.is_empty() {
            return Err(HubError::BadConfig("descriptor missing 'name'".to_string()));
        }
        if self.name.contains('.') {
            return Err(HubError::BadConfig(format!(
                "upstream name '{}' must not contain '.'",
                self.name
            )));
        }
        if self.endpoint.is_empty() {
            return Err(HubError::BadConfig(format!(
                "descriptor '{}' missing 'endpoint'",
                self.name
            )));
        }
        if self.timeout == 0 {
            return Err(HubError::BadConfig(format!(
                "descriptor '{}' has non-positive timeout",
                self.name
            )));
        }
        Ok(())
    }
}

/// One entry in the tool registry: `(qualifiedName, ownerUpstream, localName, publishedSchema)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    /// `"{owner}.{local_name}"`.
    pub qualified_name: String,
    /// Name of the upstream that owns this tool.
    pub owner: String,
    /// The tool's name as known to the owning upstream.
    pub local_name: String,
    /// The upstream's original schema, wrapped in
    /// `{"type":"function","function":{..., "name": qualifiedName}}` with the
    /// inner name overwritten to the qualified name.
    pub published_schema: Value,
}

impl ToolEntry {
    /// Builds a `ToolEntry`, wrapping `raw_schema` in the published form.
    ///
    /// `raw_schema` may already be `{"type":"function","function":{...}}`
    /// (the common upstream shape) or a bare function-schema object; both are
    /// normalized to the wrapped form with `function.name` overwritten.
    pub fn new(owner: &str, local_name: &str, raw_schema: Value) -> Self {
        let qualified_name = format!("{owner}.{local_name}");

        let function_body = if let Some(inner) = raw_schema.get("function") {
            inner.clone()
        } else {
            raw_schema.clone()
        };

        let mut function_obj = match function_body {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        function_obj.insert("name".to_string(), Value::String(qualified_name.clone()));

        let published_schema = serde_json::json!({
            "type": "function",
            "function": Value::Object(function_obj),
        });

        Self { qualified_name, owner: owner.to_string(), local_name: local_name.to_string(), published_schema }
    }
}

/// Result of dispatching a call to an upstream.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// The upstream executed the call and returned a result value.
    Success(Value),
    /// The upstream declined to execute without out-of-band approval; the
    /// opaque value is the upstream's safety assessment, forwarded verbatim.
    Pending(Value),
    /// The call failed; see [`HubError`] for the taxonomy of `kind()`s.
    Failure(HubError),
}

impl CallOutcome {
    /// Convenience constructor for a failure outcome.
    #[must_use]
    pub fn failure(err: HubError) -> Self {
        CallOutcome::Failure(err)
    }

    /// True if this outcome is `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// True if this outcome is `Pending`.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, CallOutcome::Pending(_))
    }
}
