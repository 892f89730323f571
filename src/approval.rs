//! Approval Path: re-submits a previously `Pending` call via
//! `tools/approve`. Thin by design: all the response-shape handling lives
//! in [`crate::dispatch::Dispatcher`], this module exists only to give the
//! operation its own name at the hub's public surface.

use serde_json::Value;

use crate::dispatch::Dispatcher;
use crate::model::CallOutcome;

/// Dedicated entry point for the `tools/approve` operation.
#[derive(Debug, Clone)]
pub struct ApprovalPath {
    dispatcher: Dispatcher,
}

impl ApprovalPath {
    /// Wraps a dispatcher to expose the approval operation.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Re-submits `qualified_name` with `arguments` and `approval_id`.
    ///
    /// Response handling is identical to an ordinary `tools/call`: the hub
    /// treats a second `Pending` here as a protocol violation on the
    /// upstream's part, but returns it faithfully rather than suppressing it.
    pub async fn approve(&self, qualified_name: &str, arguments: Value, approval_id: &str) -> CallOutcome {
        self.dispatcher.approve(qualified_name, arguments, approval_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;
    use crate::model::UpstreamDescriptor;
    use crate::registry::ToolRegistry;
    use crate::upstream::UpstreamManager;

    #[tokio::test]
    async fn approve_resolves_a_previously_pending_call_to_success() {
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"method":"initialize"})))
            .with_status(200)
            .with_body(serde_json::json!({"result":{"tools":[]}}).to_string())
            .create_async()
            .await;
        let _approve = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"method":"tools/approve"})))
            .with_status(200)
            .with_body(serde_json::json!({"result":{"stdout":"","returncode":0}}).to_string())
            .create_async()
            .await;

        let registry = ToolRegistry::new();
        let upstreams = UpstreamManager::new();
        upstreams
            .add(UpstreamDescriptor {
                name: "sh".into(),
                endpoint: format!("{}/mcp", server.url()),
                enabled: true,
                timeout: 5,
            })
            .await;
        upstreams.connect("sh", &registry).await.unwrap();
        registry.register("sh", "execute_command", serde_json::json!({"name": "execute_command"})).await;

        let approval = ApprovalPath::new(Dispatcher::new(registry, upstreams));
        let outcome = approval
            .approve("sh.execute_command", serde_json::json!({"command": "ls"}), "abc")
            .await;

        match outcome {
            CallOutcome::Success(value) => assert_eq!(value["returncode"], 0),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn approve_unknown_tool_is_still_unknown_tool_failure() {
        let approval = ApprovalPath::new(Dispatcher::new(ToolRegistry::new(), UpstreamManager::new()));
        let outcome = approval.approve("ghost.tool", serde_json::json!({}), "abc").await;
        assert!(matches!(outcome, CallOutcome::Failure(HubError::UnknownTool(_))));
    }
}
