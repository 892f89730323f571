//! `mcphub-core`: an engine that aggregates many JSON-RPC "MCP" tool servers
//! behind one flat, qualified-name tool namespace.
//!
//! Components: the config loader (A), per-upstream client with its
//! connect/discovery/health-ping lifecycle (B), the tool registry (C), a
//! unary dispatcher (D), a newline-delimited-JSON streaming pipeline (E), a
//! background reconciler that keeps live state converged with config (F),
//! and the `tools/approve` path for upstream-declined calls (G). [`Hub`]
//! wires all of these into one value; building an HTTP or CLI adapter on top
//! is outside this crate's scope.

pub mod approval;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod rpc;
pub mod stream;
pub mod upstream;

pub use approval::ApprovalPath;
pub use dispatch::Dispatcher;
pub use error::{HubError, Result};
pub use hub::Hub;
pub use model::{CallOutcome, ToolEntry, UpstreamDescriptor};
pub use reconcile::{ConfigSnapshot, Reconciler};
pub use registry::ToolRegistry;
pub use rpc::{parse_tolerant, ResponseShape, RpcRequest};
pub use stream::StreamChunk;
pub use upstream::{UpstreamClientState, UpstreamManager};
