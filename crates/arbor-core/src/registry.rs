//! In-process object graph that publishes lifecycle events.
//!
//! [`ObjectRegistry`] is the producer side used by the CLI, the simulator and
//! the integration tests. Every mutation takes the shared [`ObjectLock`]
//! exclusively, edits the graph, and publishes the matching
//! [`LifecycleEvent`] to each subscriber before releasing the lock, so
//! channel order always matches mutation order.
//!
//! Handles are allocated from a monotonic, address-like counter and never
//! reused.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::ErrorCode;
use crate::handle::NodeHandle;
use crate::lock::ObjectLock;
use crate::source::{LifecycleEvent, SourceGraph};

const HANDLE_BASE: u64 = 0x1000;
const HANDLE_STRIDE: u64 = 0x40;

/// Rejected registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("node {0} is not live")]
    UnknownNode(NodeHandle),

    #[error("parent {0} is not live")]
    UnknownParent(NodeHandle),

    #[error("moving {node} under {parent} would create a cycle")]
    CycleRejected { node: NodeHandle, parent: NodeHandle },
}

impl RegistryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownNode(_) => ErrorCode::UnknownNode,
            Self::UnknownParent(_) => ErrorCode::UnknownParent,
            Self::CycleRejected { .. } => ErrorCode::CycleRejected,
        }
    }
}

#[derive(Debug)]
struct GraphState {
    parents: HashMap<NodeHandle, Option<NodeHandle>>,
    children: HashMap<Option<NodeHandle>, Vec<NodeHandle>>,
    next_raw: u64,
}

impl Default for GraphState {
    fn default() -> Self {
        Self {
            parents: HashMap::new(),
            children: HashMap::new(),
            next_raw: HANDLE_BASE,
        }
    }
}

impl GraphState {
    fn allocate(&mut self) -> NodeHandle {
        let node = NodeHandle::from_raw(self.next_raw);
        self.next_raw += HANDLE_STRIDE;
        node
    }

    fn require_live(&self, node: NodeHandle) -> Result<(), RegistryError> {
        if self.parents.contains_key(&node) {
            Ok(())
        } else {
            Err(RegistryError::UnknownNode(node))
        }
    }

    fn require_parent(&self, parent: Option<NodeHandle>) -> Result<(), RegistryError> {
        match parent {
            Some(p) if !self.parents.contains_key(&p) => Err(RegistryError::UnknownParent(p)),
            _ => Ok(()),
        }
    }

    fn unlink(&mut self, parent: Option<NodeHandle>, node: NodeHandle) {
        if let Some(list) = self.children.get_mut(&parent) {
            list.retain(|&child| child != node);
            if list.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    /// `node` followed by its descendants in pre-order.
    fn subtree(&self, node: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            out.push(current);
            if let Some(kids) = self.children.get(&Some(current)) {
                pending.extend(kids.iter().rev());
            }
        }
        out
    }

    fn is_ancestor_or_self(&self, ancestor: NodeHandle, node: NodeHandle) -> bool {
        let mut current = Some(node);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.parents.get(&candidate).copied().flatten();
        }
        false
    }
}

/// Thread-safe mutable object graph.
#[derive(Debug)]
pub struct ObjectRegistry {
    lock: ObjectLock,
    state: RwLock<GraphState>,
    subscribers: Mutex<Vec<Sender<LifecycleEvent>>>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new(ObjectLock::new())
    }
}

impl ObjectRegistry {
    /// Registry coordinating through `lock`. Hand the same lock to the
    /// projection that consumes this registry's events.
    #[must_use]
    pub fn new(lock: ObjectLock) -> Self {
        Self {
            lock,
            state: RwLock::new(GraphState::default()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub const fn lock(&self) -> &ObjectLock {
        &self.lock
    }

    /// New event stream. Only events published after this call are seen.
    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Hang up every event stream. Pumps blocked in `run` return once they
    /// have drained what was already published.
    pub fn close_subscribers(&self) {
        self.subscribers.lock().clear();
    }

    /// Create a node under `parent` (`None` = root) and publish `Added`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownParent`] if `parent` is not live.
    pub fn create(&self, parent: Option<NodeHandle>) -> Result<NodeHandle, RegistryError> {
        let _guard = self.lock.write();
        let mut state = self.state.write();
        state.require_parent(parent)?;

        let node = state.allocate();
        state.parents.insert(node, parent);
        state.children.entry(parent).or_default().push(node);
        drop(state);

        trace!(%node, parent = ?parent, "object created");
        self.publish(LifecycleEvent::Added(node));
        Ok(node)
    }

    /// Destroy `node` and its whole subtree. Publishes `Removed` for `node`
    /// first, then for each descendant in pre-order. Returns the destroyed
    /// handles in that order.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownNode`] if `node` is not live.
    pub fn destroy(&self, node: NodeHandle) -> Result<Vec<NodeHandle>, RegistryError> {
        let _guard = self.lock.write();
        let mut state = self.state.write();
        state.require_live(node)?;

        let parent = state.parents.get(&node).copied().flatten();
        state.unlink(parent, node);
        let doomed = state.subtree(node);
        for &gone in &doomed {
            state.parents.remove(&gone);
            state.children.remove(&Some(gone));
        }
        drop(state);

        debug!(%node, cascade = doomed.len(), "object destroyed");
        for &gone in &doomed {
            self.publish(LifecycleEvent::Removed(gone));
        }
        Ok(doomed)
    }

    /// Move `node` under `new_parent` and publish `Reparented`.
    ///
    /// # Errors
    ///
    /// Unknown node or parent, or a parent inside `node`'s own subtree.
    pub fn reparent(&self, node: NodeHandle, new_parent: Option<NodeHandle>) -> Result<(), RegistryError> {
        let _guard = self.lock.write();
        let mut state = self.state.write();
        state.require_live(node)?;
        state.require_parent(new_parent)?;
        if let Some(parent) = new_parent {
            if state.is_ancestor_or_self(node, parent) {
                return Err(RegistryError::CycleRejected { node, parent });
            }
        }

        let old_parent = state.parents.get(&node).copied().flatten();
        state.unlink(old_parent, node);
        state.children.entry(new_parent).or_default().push(node);
        state.parents.insert(node, new_parent);
        drop(state);

        trace!(%node, from = ?old_parent, to = ?new_parent, "object reparented");
        self.publish(LifecycleEvent::Reparented(node));
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.state.read().parents.len()
    }

    /// Live handles in ascending order.
    pub fn live_nodes(&self) -> Vec<NodeHandle> {
        let mut nodes: Vec<_> = self.state.read().parents.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    /// Sorted child → parent snapshot of the live graph.
    pub fn parent_map(&self) -> BTreeMap<NodeHandle, Option<NodeHandle>> {
        self.state
            .read()
            .parents
            .iter()
            .map(|(&node, &parent)| (node, parent))
            .collect()
    }

    /// Live children of `parent` in creation/arrival order.
    pub fn children_of(&self, parent: Option<NodeHandle>) -> Vec<NodeHandle> {
        self.state
            .read()
            .children
            .get(&parent)
            .cloned()
            .unwrap_or_default()
    }

    fn publish(&self, event: LifecycleEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}

impl SourceGraph for ObjectRegistry {
    fn is_valid(&self, node: NodeHandle) -> bool {
        self.state.read().parents.contains_key(&node)
    }

    fn parent_of(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.state.read().parents.get(&node).copied().flatten()
    }
}
