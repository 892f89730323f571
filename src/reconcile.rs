//! Reconciler: a background loop that diffs a freshly loaded config snapshot
//! against live state, applies add/remove/change, pings healthy peers, and
//! exponentially backs off failed reconnects.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use sha1::{Digest, Sha1};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::Result;
use crate::model::UpstreamDescriptor;
use crate::registry::ToolRegistry;
use crate::upstream::{UpstreamClientState, UpstreamManager};

/// Default tick interval for the reconciler.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// A content-addressed snapshot of the descriptor set: a name→descriptor
/// map plus a stable hash of the sorted `(name, endpoint, enabled, timeout)`
/// tuples.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub descriptors: HashMap<String, UpstreamDescriptor>,
    pub hash: String,
}

impl ConfigSnapshot {
    fn from_descriptors(descriptors: Vec<UpstreamDescriptor>) -> Self {
        let mut rows: Vec<_> = descriptors
            .iter()
            .map(|d| (d.name.clone(), d.endpoint.clone(), d.enabled, d.timeout))
            .collect();
        rows.sort();

        let mut hasher = Sha1::new();
        hasher.update(serde_json::to_vec(&rows).expect("tuple vec always serializes"));
        let hash = hex::encode(hasher.finalize());

        let descriptors = descriptors.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self { descriptors, hash }
    }
}

/// Runs the reconciliation loop against one config file, shared registry,
/// and upstream manager.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config_path: PathBuf,
    registry: ToolRegistry,
    upstreams: UpstreamManager,
    interval: Duration,
}

impl Reconciler {
    /// Builds a reconciler for `config_path` at the default 300s interval.
    #[must_use]
    pub fn new(config_path: PathBuf, registry: ToolRegistry, upstreams: UpstreamManager) -> Self {
        Self { config_path, registry, upstreams, interval: DEFAULT_INTERVAL }
    }

    /// Overrides the tick interval (for tests and non-default deployments).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawns the background loop. Dropping the returned handle does not
    /// stop the task; call `.abort()` on it to do so.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            let mut applied_hash = String::new();
            loop {
                ticker.tick().await;
                applied_hash = self.tick(applied_hash).await;
            }
        })
    }

    /// Runs exactly one reconciliation tick, returning the (possibly
    /// unchanged) applied hash for the caller to carry into the next tick.
    /// Exposed directly so tests can drive ticks deterministically.
    pub async fn tick(&self, applied_hash: String) -> String {
        let snapshot = match self.load_snapshot() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "reconciler: failed to load config snapshot, keeping prior state");
                return applied_hash;
            }
        };

        if snapshot.hash == applied_hash {
            debug!("reconciler: snapshot hash unchanged, skipping diff");
            self.run_health_pass().await;
            return applied_hash;
        }

        self.apply_diff(&snapshot).await;
        self.run_health_pass().await;
        snapshot.hash
    }

    fn load_snapshot(&self) -> Result<ConfigSnapshot> {
        let descriptors = config::load(&self.config_path)?;
        Ok(ConfigSnapshot::from_descriptors(descriptors))
    }

    async fn apply_diff(&self, snapshot: &ConfigSnapshot) {
        let live_states = self.upstreams.list_states().await;
        let live_names: std::collections::HashSet<_> = live_states.iter().map(|(n, _)| n.clone()).collect();

        for name in live_names.difference(&snapshot.descriptors.keys().cloned().collect()) {
            info!(upstream = %name, "reconciler: removing upstream no longer in config");
            self.upstreams.remove(name, &self.registry).await;
        }

        for (name, descriptor) in &snapshot.descriptors {
            match self.upstreams.descriptor(name).await {
                None => {
                    info!(upstream = %name, "reconciler: adding new upstream");
                    self.upstreams.add(descriptor.clone()).await;
                    if descriptor.enabled {
                        self.try_connect(name).await;
                    }
                }
                Some(existing) if &existing != descriptor => {
                    info!(upstream = %name, "reconciler: descriptor changed, reconnecting");
                    self.upstreams.remove(name, &self.registry).await;
                    self.upstreams.add(descriptor.clone()).await;
                    if descriptor.enabled {
                        self.try_connect(name).await;
                    }
                }
                Some(_) => {}
            }
        }
    }

    async fn run_health_pass(&self) {
        for (name, state) in self.upstreams.list_states().await {
            match state {
                UpstreamClientState::Unhealthy => {
                    if self.upstreams.reconnect_due(&name).await {
                        self.try_connect(&name).await;
                    }
                }
                UpstreamClientState::Connected => {
                    if let Err(e) = self.upstreams.health_ping(&name).await {
                        debug!(upstream = %name, error = %e, "reconciler: health ping failed");
                    }
                }
                _ => {}
            }
        }
    }

    async fn try_connect(&self, name: &str) {
        if let Err(e) = self.upstreams.connect(name, &self.registry).await {
            warn!(upstream = %name, error = %e, "reconciler: connect attempt failed");
        }
    }
}
