//! The source-graph collaborator and the lifecycle events it publishes.
//!
//! The engine never holds references into the graph it projects. Everything
//! it needs is expressed through [`SourceGraph`]: a liveness check that must
//! be safe for dead handles, and the reported parent of a live node.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::handle::NodeHandle;

/// Narrow view of the externally owned object graph.
///
/// Implementations are queried while the engine holds the shared
/// [`ObjectLock`](crate::lock::ObjectLock) and must not try to acquire it
/// themselves.
pub trait SourceGraph: Send + Sync {
    /// Whether `node` is currently live. Must never dereference `node`.
    fn is_valid(&self, node: NodeHandle) -> bool;

    /// Reported parent of a live node, `None` when it sits at the root.
    fn parent_of(&self, node: NodeHandle) -> Option<NodeHandle>;
}

impl<S: SourceGraph + ?Sized> SourceGraph for Arc<S> {
    fn is_valid(&self, node: NodeHandle) -> bool {
        (**self).is_valid(node)
    }

    fn parent_of(&self, node: NodeHandle) -> Option<NodeHandle> {
        (**self).parent_of(node)
    }
}

/// Object lifecycle notification delivered by the source graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "node", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The node became live.
    Added(NodeHandle),
    /// The node was destroyed.
    Removed(NodeHandle),
    /// The node changed parent.
    Reparented(NodeHandle),
}

impl LifecycleEvent {
    /// The node this event is about.
    #[must_use]
    pub const fn node(self) -> NodeHandle {
        match self {
            Self::Added(node) | Self::Removed(node) | Self::Reparented(node) => node,
        }
    }

    /// Short lowercase name, used in log fields.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Removed(_) => "removed",
            Self::Reparented(_) => "reparented",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.node())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_exposes_node_and_kind() {
        let node = NodeHandle::from_raw(0x40);
        let event = LifecycleEvent::Reparented(node);
        assert_eq!(event.node(), node);
        assert_eq!(event.kind(), "reparented");
        assert_eq!(event.to_string(), "reparented(0x40)");
    }

    #[test]
    fn event_serializes_with_kind_tag() {
        let event = LifecycleEvent::Added(NodeHandle::from_raw(16));
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"kind":"added","node":16}"#);
        let back: LifecycleEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
    }
}
