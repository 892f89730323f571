//! Dispatcher: resolves a qualified tool name to its owning upstream and
//! performs one unary `tools/call`.
//!
//! Deliberately does not interpret the *contents* of a successful result,
//! that is the caller's problem.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::HubError;
use crate::model::CallOutcome;
use crate::registry::ToolRegistry;
use crate::rpc::{parse_tolerant, ResponseShape, RpcRequest};
use crate::upstream::UpstreamManager;

/// Dispatches unary `tools/call` and `tools/approve` requests.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ToolRegistry,
    upstreams: UpstreamManager,
}

impl Dispatcher {
    /// Builds a dispatcher over a shared registry and upstream manager.
    #[must_use]
    pub fn new(registry: ToolRegistry, upstreams: UpstreamManager) -> Self {
        Self { registry, upstreams }
    }

    /// Calls `qualified_name` with `arguments` via `tools/call`. Never
    /// returns `Err`: every failure mode is carried in the returned
    /// [`CallOutcome::Failure`].
    pub async fn call(&self, qualified_name: &str, arguments: Value) -> CallOutcome {
        self.dispatch(qualified_name, "tools/call", serde_json::json!({ "arguments": arguments })).await
    }

    /// Re-submits a previously `Pending` call via `tools/approve`, attaching
    /// `approval_id`. Response handling is identical to [`call`](Self::call);
    /// a second `Pending` here is a protocol violation on the upstream's
    /// part but is still returned faithfully, not suppressed.
    pub async fn approve(&self, qualified_name: &str, arguments: Value, approval_id: &str) -> CallOutcome {
        self.dispatch(
            qualified_name,
            "tools/approve",
            serde_json::json!({ "arguments": arguments, "approval_id": approval_id }),
        )
        .await
    }

    async fn dispatch(&self, qualified_name: &str, method: &str, mut extra_params: Value) -> CallOutcome {
        let Some(entry) = self.registry.lookup(qualified_name).await else {
            return CallOutcome::failure(HubError::UnknownTool(qualified_name.to_string()));
        };

        let Some(handle) = self.upstreams.dispatch_handle(&entry.owner).await else {
            return CallOutcome::failure(HubError::ServerUnavailable(entry.owner.clone()));
        };

        if let Value::Object(ref mut map) = extra_params {
            map.insert("name".to_string(), Value::String(entry.local_name.clone()));
        }
        let req = RpcRequest::new(handle.request_id, method, extra_params);

        debug!(qualified_name, owner = %entry.owner, id = handle.request_id, "dispatching call");

        let resp = match handle.client.post(&handle.endpoint).json(&req).send().await {
            Ok(resp) => resp,
            Err(e) => return CallOutcome::failure(HubError::TransportError(e.to_string())),
        };

        if !resp.status().is_success() {
            return CallOutcome::failure(HubError::TransportError(format!(
                "non-200 response: {}",
                resp.status()
            )));
        }

        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => return CallOutcome::failure(HubError::TransportError(e.to_string())),
        };

        let body = match parse_tolerant(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(qualified_name, error = %e, "response body was not valid JSON on either attempt");
                return CallOutcome::failure(HubError::FramingError(e.to_string()));
            }
        };

        match ResponseShape::classify(body) {
            ResponseShape::Error { message } => CallOutcome::failure(HubError::UpstreamError(message)),
            ResponseShape::Result { value, pending } => {
                if pending {
                    CallOutcome::Pending(value)
                } else {
                    CallOutcome::Success(value)
                }
            }
            ResponseShape::Bare(value) => CallOutcome::Success(value),
        }
    }
}
