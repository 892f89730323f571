//! Tool Registry: the mapping from qualified tool name to `(owner, local
//! name, published schema)`.
//!
//! Writes happen only during discovery/purge, serialized behind a single
//! write lock; reads are non-blocking snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::model::ToolEntry;

/// Registry of qualified tool names to their owning upstream and schema.
///
/// Cheaply `Clone`: every clone shares the same underlying map.
#[derive(Clone)]
pub struct ToolRegistry {
    entries: Arc<RwLock<HashMap<String, ToolEntry>>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.entries.try_read().map(|e| e.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Registers (or re-registers) one tool under `"{owner}.{local_name}"`.
    ///
    /// Idempotent on identical input: registering the same owner/local_name
    /// with an unchanged schema is a no-op observationally (the entry is
    /// simply overwritten with an equal value).
    pub async fn register(&self, owner: &str, local_name: &str, schema: Value) {
        let entry = ToolEntry::new(owner, local_name, schema);
        debug!(qualified_name = %entry.qualified_name, owner = %owner, "registering tool");
        let mut entries = self.entries.write().await;
        entries.insert(entry.qualified_name.clone(), entry);
    }

    /// Removes every tool owned by `owner`. Called atomically with respect
    /// to other registry writers (the whole purge happens under one lock
    /// acquisition) so no reader ever observes a partially-purged owner.
    pub async fn purge_owner(&self, owner: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.owner != owner);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(owner = %owner, purged, "purged tools for owner");
        }
        purged
    }

    /// Looks up a tool by its qualified name.
    pub async fn lookup(&self, qualified_name: &str) -> Option<ToolEntry> {
        let entries = self.entries.read().await;
        let found = entries.get(qualified_name).cloned();
        if found.is_none() {
            warn!(qualified_name, "tool lookup miss");
        }
        found
    }

    /// Lists every registered tool, each exactly once, identified by its
    /// qualified name.
    pub async fn list_all(&self) -> Vec<ToolEntry> {
        let entries = self.entries.read().await;
        entries.values().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
