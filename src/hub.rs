//! Top-level façade wiring the Config Loader, Upstream Client set, Tool
//! Registry, Dispatcher, Stream Pipeline, Reconciler, and Approval Path
//! into one ordinary, `Clone`-able value. The HTTP adapter owns the single
//! instance for the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::info;

use crate::approval::ApprovalPath;
use crate::config;
use crate::dispatch::Dispatcher;
use crate::model::{CallOutcome, ToolEntry, UpstreamDescriptor};
use crate::reconcile::Reconciler;
use crate::registry::ToolRegistry;
use crate::stream::{self, StreamChunk};
use crate::upstream::{UpstreamClientState, UpstreamManager};

/// An MCP Hub instance: aggregates many upstream tool servers into one
/// qualified-name namespace and routes calls to their owners.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: ToolRegistry,
    upstreams: UpstreamManager,
    dispatcher: Dispatcher,
    approval: ApprovalPath,
}

impl Hub {
    /// Builds an empty hub with no configured upstreams.
    #[must_use]
    pub fn new() -> Self {
        let registry = ToolRegistry::new();
        let upstreams = UpstreamManager::new();
        let dispatcher = Dispatcher::new(registry.clone(), upstreams.clone());
        let approval = ApprovalPath::new(dispatcher.clone());
        Self { registry, upstreams, dispatcher, approval }
    }

    /// Loads descriptors from `config_path` and connects every enabled
    /// upstream before returning. Connect failures leave that upstream
    /// `Unhealthy` rather than failing the whole call (only a malformed
    /// config file itself is a hard error).
    ///
    /// # Errors
    /// Propagates [`crate::error::HubError::BadConfig`] from the config loader.
    pub async fn from_config(config_path: &Path) -> crate::error::Result<Self> {
        let hub = Self::new();
        let descriptors = config::load(config_path)?;
        for descriptor in descriptors {
            hub.add_upstream(descriptor).await;
        }
        Ok(hub)
    }

    /// Adds an upstream and, if enabled, attempts to connect it immediately.
    /// Connect failure leaves the upstream `Unhealthy`; it is retried by the
    /// reconciler.
    pub async fn add_upstream(&self, descriptor: UpstreamDescriptor) {
        let name = descriptor.name.clone();
        let enabled = descriptor.enabled;
        self.upstreams.add(descriptor).await;
        if enabled {
            if let Err(e) = self.upstreams.connect(&name, &self.registry).await {
                info!(upstream = %name, error = %e, "initial connect failed, will retry via reconciler");
            }
        }
    }

    /// Removes an upstream, closing its client and purging its tools.
    pub async fn remove_upstream(&self, name: &str) {
        self.upstreams.remove(name, &self.registry).await;
    }

    /// Lists every registered tool across all upstreams.
    pub async fn list_tools(&self) -> Vec<ToolEntry> {
        self.registry.list_all().await
    }

    /// Lists every known upstream with its current lifecycle state.
    pub async fn list_servers(&self) -> Vec<(String, UpstreamClientState)> {
        self.upstreams.list_states().await
    }

    /// Dispatches a unary `tools/call`.
    pub async fn call(&self, qualified_name: &str, arguments: Value) -> CallOutcome {
        self.dispatcher.call(qualified_name, arguments).await
    }

    /// Dispatches a streaming `tools/call`.
    pub fn call_streaming(
        &self,
        qualified_name: &str,
        arguments: Value,
    ) -> impl Stream<Item = StreamChunk> + Send + 'static {
        stream::call_streaming(
            self.registry.clone(),
            self.upstreams.clone(),
            qualified_name.to_string(),
            arguments,
        )
    }

    /// Re-submits a previously `Pending` call via `tools/approve`.
    pub async fn approve(&self, qualified_name: &str, arguments: Value, approval_id: &str) -> CallOutcome {
        self.approval.approve(qualified_name, arguments, approval_id).await
    }

    /// Spawns the background reconciler against `config_path` at `interval`.
    /// The returned handle's task runs until aborted or the process exits.
    pub fn start_reconciler(&self, config_path: PathBuf, interval: Duration) -> JoinHandle<()> {
        Reconciler::new(config_path, self.registry.clone(), self.upstreams.clone())
            .with_interval(interval)
            .spawn()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
