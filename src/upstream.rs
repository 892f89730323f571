//! Upstream Client: one per upstream, owning its HTTP transport, monotonic
//! request-id counter, and lifecycle state.
//!
//! State machine: `Disabled`, `Disconnected`, `Connecting`, `Connected`,
//! `Unhealthy`. Connect/discover/health-ping protocol lives here; the
//! reconciler drives transitions, the dispatcher reads the `Connected`
//! snapshot to route calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{HubError, Result};
use crate::model::UpstreamDescriptor;
use crate::registry::ToolRegistry;
use crate::rpc::{parse_tolerant, ResponseShape, RpcRequest};

/// Lifecycle state of one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamClientState {
    /// Present in config with `enabled=false`; never holds a live client.
    Disabled,
    /// Enabled but not currently connected (initial state, or after removal
    /// of the live client without disabling).
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// `initialize`/discovery succeeded; the client holds a live HTTP client.
    Connected,
    /// A connect attempt or health ping failed; subject to backoff before
    /// the next reconnect attempt.
    Unhealthy,
}

impl UpstreamClientState {
    /// Validates a lifecycle transition.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        use UpstreamClientState::{Connected, Connecting, Disabled, Disconnected, Unhealthy};
        match (*self, to) {
            (_, Disabled) => true,
            (Disabled, Disconnected | Connecting) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected | Unhealthy) => true,
            (Connected, Unhealthy | Disconnected) => true,
            (Unhealthy, Connecting | Disconnected) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// Backoff bookkeeping for a failed upstream: `delay = min(60s, 2^min(attempt,6))`.
#[derive(Debug, Clone, Copy)]
struct RetryRecord {
    attempt: u32,
    not_before: Instant,
}

impl RetryRecord {
    fn fresh() -> Self {
        Self { attempt: 0, not_before: Instant::now() }
    }

    fn record_failure(&mut self) {
        self.attempt += 1;
        self.not_before = Instant::now() + backoff_delay(self.attempt);
    }

    fn reset(&mut self) {
        self.attempt = 0;
        self.not_before = Instant::now();
    }

    fn due(&self) -> bool {
        Instant::now() >= self.not_before
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let capped = attempt.min(6);
    Duration::from_secs(60u64.min(2u64.saturating_pow(capped)))
}

/// A ready-to-use handle for the dispatcher: the live client, endpoint, and
/// the next request id, for exactly one upstream that was `Connected` at the
/// moment this handle was taken.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    pub client: Client,
    pub endpoint: String,
    pub request_id: u64,
}

struct UpstreamRuntime {
    descriptor: UpstreamDescriptor,
    state: UpstreamClientState,
    client: Option<Client>,
    next_id: u64,
    retry: RetryRecord,
}

impl UpstreamRuntime {
    fn new(descriptor: UpstreamDescriptor) -> Self {
        let state =
            if descriptor.enabled { UpstreamClientState::Disconnected } else { UpstreamClientState::Disabled };
        Self { descriptor, state, client: None, next_id: 0, retry: RetryRecord::fresh() }
    }

    fn set_state(&mut self, to: UpstreamClientState) {
        if self.state.can_transition_to(to) {
            self.state = to;
        } else {
            warn!(from = ?self.state, to = ?to, "ignoring invalid upstream state transition");
        }
    }

    fn take_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Owns the live state of every configured upstream.
#[derive(Debug, Clone)]
pub struct UpstreamManager {
    upstreams: Arc<RwLock<HashMap<String, UpstreamRuntime>>>,
}

impl std::fmt::Debug for UpstreamRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamRuntime")
            .field("name", &self.descriptor.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl UpstreamManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { upstreams: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Adds (or replaces) an upstream's descriptor. Does not connect; callers
    /// invoke [`connect`](Self::connect) afterward if `descriptor.enabled`.
    pub async fn add(&self, descriptor: UpstreamDescriptor) {
        let name = descriptor.name.clone();
        let mut upstreams = self.upstreams.write().await;
        upstreams.insert(name, UpstreamRuntime::new(descriptor));
    }

    /// Removes an upstream entirely: drops its HTTP client (closing it) and
    /// purges every tool it owned from `registry`.
    pub async fn remove(&self, name: &str, registry: &ToolRegistry) {
        let mut upstreams = self.upstreams.write().await;
        upstreams.remove(name);
        drop(upstreams);
        registry.purge_owner(name).await;
    }

    /// Current lifecycle state, if the upstream is known.
    pub async fn state(&self, name: &str) -> Option<UpstreamClientState> {
        self.upstreams.read().await.get(name).map(|u| u.state)
    }

    /// The descriptor currently on file for `name`.
    pub async fn descriptor(&self, name: &str) -> Option<UpstreamDescriptor> {
        self.upstreams.read().await.get(name).map(|u| u.descriptor.clone())
    }

    /// All known upstream names paired with their lifecycle state, for a
    /// hub-wide health snapshot.
    pub async fn list_states(&self) -> Vec<(String, UpstreamClientState)> {
        self.upstreams.read().await.iter().map(|(n, u)| (n.clone(), u.state)).collect()
    }

    /// True if `name` is `Unhealthy` and its backoff window has elapsed.
    pub async fn reconnect_due(&self, name: &str) -> bool {
        let upstreams = self.upstreams.read().await;
        match upstreams.get(name) {
            Some(u) if u.state == UpstreamClientState::Unhealthy => u.retry.due(),
            _ => false,
        }
    }

    /// A dispatch-ready snapshot of a `Connected` upstream: a cloned client
    /// handle (cheap; `reqwest::Client` is `Arc`-backed internally), its
    /// endpoint, and the next request id. Returns `None` if the upstream is
    /// unknown or not `Connected`.
    pub async fn dispatch_handle(&self, name: &str) -> Option<DispatchHandle> {
        let mut upstreams = self.upstreams.write().await;
        let runtime = upstreams.get_mut(name)?;
        if runtime.state != UpstreamClientState::Connected {
            return None;
        }
        let client = runtime.client.clone()?;
        let endpoint = runtime.descriptor.endpoint.clone();
        let request_id = runtime.take_id();
        Some(DispatchHandle { client, endpoint, request_id })
    }

    /// Runs the `initialize` → discover protocol against one upstream and
    /// registers whatever tools it reports. On failure, transitions the
    /// upstream to `Unhealthy` with backoff bookkeeping and returns `Err`
    /// without registering anything.
    ///
    /// # Errors
    /// Returns [`HubError::TransportError`] on an HTTP/connection failure or
    /// [`HubError::UpstreamError`] if `initialize` itself reports a JSON-RPC
    /// `error` object.
    pub async fn connect(&self, name: &str, registry: &ToolRegistry) -> Result<()> {
        let descriptor = self
            .descriptor(name)
            .await
            .ok_or_else(|| HubError::Other(format!("unknown upstream '{name}'")))?;

        self.transition(name, UpstreamClientState::Connecting).await;

        let client = Client::builder()
            .timeout(Duration::from_secs(descriptor.timeout))
            .build()
            .map_err(|e| HubError::TransportError(e.to_string()))?;

        match self.run_connect_protocol(name, &client, &descriptor, registry).await {
            Ok(()) => {
                self.install_connected_client(name, client).await;
                Ok(())
            }
            Err(err) => {
                self.mark_unhealthy(name).await;
                Err(err)
            }
        }
    }

    async fn run_connect_protocol(
        &self,
        name: &str,
        client: &Client,
        descriptor: &UpstreamDescriptor,
        registry: &ToolRegistry,
    ) -> Result<()> {
        let init_req = RpcRequest::new(
            self.take_id(name).await,
            "initialize",
            serde_json::json!({
                "clientInfo": {"name": "MCPHub", "version": "1.0.0"},
                "capabilities": {},
            }),
        );
        let init_body = post_rpc(client, &descriptor.endpoint, &init_req).await?;
        let init_shape = ResponseShape::classify(init_body);

        if let ResponseShape::Error { message } = &init_shape {
            return Err(HubError::UpstreamError(message.clone()));
        }

        let tools_from_init = match &init_shape {
            ResponseShape::Result { value, .. } => value.get("tools").and_then(Value::as_array).cloned(),
            _ => None,
        };

        let tool_rows = match tools_from_init {
            Some(rows) => rows,
            None => {
                let list_req = RpcRequest::new(self.take_id(name).await, "tools/list", serde_json::json!({}));
                let list_body = post_rpc(client, &descriptor.endpoint, &list_req).await?;
                extract_tool_rows(ResponseShape::classify(list_body))?
            }
        };

        for row in tool_rows {
            if let Some(local_name) = tool_local_name(&row) {
                registry.register(&descriptor.name, &local_name, row).await;
            } else {
                warn!(owner = %descriptor.name, "discovered tool row without a name, skipping");
            }
        }

        Ok(())
    }

    async fn install_connected_client(&self, name: &str, client: Client) {
        let mut upstreams = self.upstreams.write().await;
        if let Some(runtime) = upstreams.get_mut(name) {
            runtime.set_state(UpstreamClientState::Connected);
            runtime.client = Some(client);
            runtime.retry.reset();
            debug!(upstream = %name, "upstream connected");
        }
    }

    async fn mark_unhealthy(&self, name: &str) {
        let mut upstreams = self.upstreams.write().await;
        if let Some(runtime) = upstreams.get_mut(name) {
            runtime.set_state(UpstreamClientState::Unhealthy);
            runtime.client = None;
            runtime.retry.record_failure();
            warn!(upstream = %name, attempt = runtime.retry.attempt, "upstream marked unhealthy");
        }
    }

    async fn transition(&self, name: &str, to: UpstreamClientState) {
        let mut upstreams = self.upstreams.write().await;
        if let Some(runtime) = upstreams.get_mut(name) {
            runtime.set_state(to);
        }
    }

    /// Draws the next id from `name`'s request-id counter, the same counter
    /// `dispatch_handle` draws from, so the handshake and every later
    /// dispatched call share one strictly increasing sequence.
    async fn take_id(&self, name: &str) -> u64 {
        let mut upstreams = self.upstreams.write().await;
        match upstreams.get_mut(name) {
            Some(runtime) => runtime.take_id(),
            None => 1,
        }
    }

    /// Pings a `Connected` upstream's health endpoint, derived by replacing a
    /// trailing `/mcp` segment with `/health`. Upstreams whose endpoint
    /// doesn't end in `/mcp` have no derivable health endpoint and are left
    /// `Connected` (no ping attempted, not treated as a failure).
    ///
    /// # Errors
    /// Returns [`HubError::TransportError`] on a non-200 response or request
    /// failure; the upstream is also transitioned to `Unhealthy` in that case.
    pub async fn health_ping(&self, name: &str) -> Result<()> {
        let (endpoint, client) = {
            let upstreams = self.upstreams.read().await;
            let runtime = upstreams
                .get(name)
                .ok_or_else(|| HubError::Other(format!("unknown upstream '{name}'")))?;
            if runtime.state != UpstreamClientState::Connected {
                return Ok(());
            }
            match (runtime.descriptor.endpoint.strip_suffix("/mcp"), runtime.client.clone()) {
                (Some(base), Some(client)) => (format!("{base}/health"), client),
                _ => return Ok(()),
            }
        };

        match client.get(&endpoint).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                let status = resp.status();
                self.mark_unhealthy(name).await;
                Err(HubError::TransportError(format!("health ping to '{endpoint}' returned {status}")))
            }
            Err(e) => {
                self.mark_unhealthy(name).await;
                Err(HubError::TransportError(e.to_string()))
            }
        }
    }
}

impl Default for UpstreamManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn post_rpc(client: &Client, endpoint: &str, req: &RpcRequest) -> Result<Value> {
    let resp = client
        .post(endpoint)
        .json(req)
        .send()
        .await
        .map_err(|e| HubError::TransportError(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(HubError::TransportError(format!("non-200 response: {}", resp.status())));
    }

    let bytes = resp.bytes().await.map_err(|e| HubError::TransportError(e.to_string()))?;
    parse_tolerant(&bytes).map_err(|e| HubError::FramingError(e.to_string()))
}

/// Accepts a `tools/list` response in any of the shapes an upstream may use:
/// a bare list, `{result: [...]}`/`{result: {tools: [...]}}`, or
/// `{tools: [...]}`.
fn extract_tool_rows(shape: ResponseShape) -> Result<Vec<Value>> {
    match shape {
        ResponseShape::Result { value, .. } => match value {
            Value::Array(rows) => Ok(rows),
            Value::Object(ref map) => match map.get("tools").and_then(Value::as_array) {
                Some(rows) => Ok(rows.clone()),
                None => Ok(vec![]),
            },
            _ => Ok(vec![]),
        },
        ResponseShape::Bare(Value::Array(rows)) => Ok(rows),
        ResponseShape::Bare(Value::Object(ref map)) => {
            Ok(map.get("tools").and_then(Value::as_array).cloned().unwrap_or_default())
        }
        ResponseShape::Error { message } => Err(HubError::UpstreamError(message)),
        ResponseShape::Bare(_) => Ok(vec![]),
    }
}

fn tool_local_name(row: &Value) -> Option<String> {
    row.get("function")
        .and_then(|f| f.get("name"))
        .or_else(|| row.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;

    fn descriptor(name: &str, endpoint: &str) -> UpstreamDescriptor {
        UpstreamDescriptor { name: name.to_string(), endpoint: endpoint.to_string(), enabled: true, timeout: 5 }
    }

    #[test]
    fn state_transitions_follow_the_lifecycle() {
        use UpstreamClientState::{Connected, Connecting, Disabled, Disconnected, Unhealthy};
        assert!(Disabled.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Unhealthy));
        assert!(Connected.can_transition_to(Unhealthy));
        assert!(Unhealthy.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disabled));
    }

    #[test]
    fn backoff_caps_at_sixty_seconds() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(6), Duration::from_secs(60));
        assert_eq!(backoff_delay(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn add_without_enabling_leaves_disabled() {
        let manager = UpstreamManager::new();
        let mut d = descriptor("local", "http://u/mcp");
        d.enabled = false;
        manager.add(d).await;
        assert_eq!(manager.state("local").await, Some(UpstreamClientState::Disabled));
    }

    #[tokio::test]
    async fn connect_adopts_tools_from_initialize_result() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "jsonrpc": "2.0", "id": 1,
                    "result": {
                        "tools": [{"type":"function","function":{"name":"echo","description":"e"}}]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let manager = UpstreamManager::new();
        let registry = ToolRegistry::new();
        manager.add(descriptor("local", &format!("{}/mcp", server.url()))).await;

        manager.connect("local", &registry).await.expect("connect should succeed");

        assert_eq!(manager.state("local").await, Some(UpstreamClientState::Connected));
        let entry = registry.lookup("local.echo").await.expect("tool should be registered");
        assert_eq!(entry.published_schema["function"]["name"], "local.echo");
    }

    #[tokio::test]
    async fn connect_falls_back_to_tools_list() {
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"method":"initialize"})))
            .with_status(200)
            .with_body(serde_json::json!({"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"x"}}).to_string())
            .create_async()
            .await;
        let _list = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"method":"tools/list"})))
            .with_status(200)
            .with_body(serde_json::json!({"result":{"tools":[{"function":{"name":"add"}}]}}).to_string())
            .create_async()
            .await;

        let manager = UpstreamManager::new();
        let registry = ToolRegistry::new();
        manager.add(descriptor("local", &format!("{}/mcp", server.url()))).await;
        manager.connect("local", &registry).await.expect("connect should succeed");

        assert!(registry.lookup("local.add").await.is_some());
    }

    #[tokio::test]
    async fn connect_error_from_initialize_marks_unhealthy_and_registers_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_body(serde_json::json!({"error":{"code":-32000,"message":"boom"}}).to_string())
            .create_async()
            .await;

        let manager = UpstreamManager::new();
        let registry = ToolRegistry::new();
        manager.add(descriptor("local", &format!("{}/mcp", server.url()))).await;

        let err = manager.connect("local", &registry).await.unwrap_err();
        assert!(matches!(err, HubError::UpstreamError(_)));
        assert_eq!(manager.state("local").await, Some(UpstreamClientState::Unhealthy));
        assert!(registry.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_handle_is_none_unless_connected() {
        let manager = UpstreamManager::new();
        manager.add(descriptor("local", "http://u/mcp")).await;
        assert!(manager.dispatch_handle("local").await.is_none());
    }

    #[tokio::test]
    async fn remove_purges_tools_and_forgets_upstream() {
        let manager = UpstreamManager::new();
        let registry = ToolRegistry::new();
        manager.add(descriptor("local", "http://u/mcp")).await;
        registry.register("local", "echo", serde_json::json!({"name":"echo"})).await;

        manager.remove("local", &registry).await;

        assert!(manager.state("local").await.is_none());
        assert!(registry.lookup("local.echo").await.is_none());
    }

    #[tokio::test]
    async fn request_ids_are_strictly_increasing_across_calls() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_body(serde_json::json!({"result":{"tools":[]}}).to_string())
            .create_async()
            .await;

        let manager = UpstreamManager::new();
        let registry = ToolRegistry::new();
        manager.add(descriptor("local", &format!("{}/mcp", server.url()))).await;
        manager.connect("local", &registry).await.unwrap();

        let first = manager.dispatch_handle("local").await.unwrap().request_id;
        let second = manager.dispatch_handle("local").await.unwrap().request_id;
        assert!(second > first);
    }

    #[tokio::test]
    async fn handshake_ids_are_not_reused_by_the_first_dispatched_call() {
        // The `initialize` (and, on fallback, `tools/list`) requests sent
        // during connect must draw from the same counter dispatch_handle
        // draws from, so a connected upstream's id sequence across its
        // lifetime is strictly increasing with no repeats.
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"method":"initialize"})))
            .with_status(200)
            .with_body(serde_json::json!({"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"x"}}).to_string())
            .create_async()
            .await;
        let _list = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"method":"tools/list"})))
            .with_status(200)
            .with_body(serde_json::json!({"result":{"tools":[]}}).to_string())
            .create_async()
            .await;

        let manager = UpstreamManager::new();
        let registry = ToolRegistry::new();
        manager.add(descriptor("local", &format!("{}/mcp", server.url()))).await;
        manager.connect("local", &registry).await.unwrap();

        // initialize=1, tools/list=2 were consumed during connect; the first
        // dispatched call must get id 3, not a reused 1.
        let first_dispatch = manager.dispatch_handle("local").await.unwrap().request_id;
        assert_eq!(first_dispatch, 3);
    }
}
