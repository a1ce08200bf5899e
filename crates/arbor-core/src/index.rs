//! Derived parent/child indexes and the position queries built on them.
//!
//! [`TreeIndex`] holds two maps that must stay mutual inverses:
//!
//! - **children**: parent (or the root sentinel `None`) → ordered children,
//!   in insertion order;
//! - **parents**: child → parent.
//!
//! `parents[c] == p` iff `c` appears in `children[p]`, after every public
//! engine operation. Mutation is crate-private; the engine is the only writer.
//! Observers receive a `&TreeIndex` during notifications and use the same
//! read methods as everyone else.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::handle::NodeHandle;

/// Transient structural coordinate of a node: its row under its parent.
///
/// The parent's own position is derived from the index, so a `Position` is
/// only meaningful until the next structural mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    row: usize,
    node: NodeHandle,
}

impl Position {
    /// Row within the parent's children sequence.
    #[must_use]
    pub const fn row(self) -> usize {
        self.row
    }

    /// The node this position points at.
    #[must_use]
    pub const fn node(self) -> NodeHandle {
        self.node
    }
}

/// Violation of the index invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("{node} records parent {} but is missing from its children", label(.parent))]
    MissingChild {
        node: NodeHandle,
        parent: Option<NodeHandle>,
    },

    #[error("{node} is listed under {} but records parent {}", label(.listed_under), recorded_label(.recorded))]
    MissingParent {
        node: NodeHandle,
        listed_under: Option<NodeHandle>,
        recorded: Option<Option<NodeHandle>>,
    },

    #[error("{node} appears {occurrences} times under {}", label(.parent))]
    DuplicateChild {
        node: NodeHandle,
        parent: Option<NodeHandle>,
        occurrences: usize,
    },

    #[error("{count} children recorded under unindexed node {parent}")]
    OrphanedChildren { parent: NodeHandle, count: usize },

    #[error("{node} is indexed but not reachable from the root")]
    Unreachable { node: NodeHandle },
}

impl ConsistencyError {
    /// Machine-readable code for this violation.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingChild { .. } => ErrorCode::IndexMissingChild,
            Self::MissingParent { .. } => ErrorCode::IndexMissingParent,
            Self::DuplicateChild { .. } => ErrorCode::DuplicateChild,
            Self::OrphanedChildren { .. } => ErrorCode::OrphanedChildren,
            Self::Unreachable { .. } => ErrorCode::UnreachableNode,
        }
    }
}

#[allow(clippy::ref_option)]
fn label(parent: &Option<NodeHandle>) -> String {
    parent.map_or_else(|| "root".to_string(), |node| node.to_string())
}

#[allow(clippy::ref_option)]
fn recorded_label(recorded: &Option<Option<NodeHandle>>) -> String {
    recorded
        .as_ref()
        .map_or_else(|| "nothing".to_string(), label)
}

/// The two derived indexes over the live object set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeIndex {
    children: HashMap<Option<NodeHandle>, Vec<NodeHandle>>,
    parents: HashMap<NodeHandle, Option<NodeHandle>>,
}

impl TreeIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Whether `node` has an index entry.
    #[must_use]
    pub fn contains(&self, node: NodeHandle) -> bool {
        self.parents.contains_key(&node)
    }

    /// Recorded parent of `node`: `None` if unindexed, `Some(None)` at the root.
    #[must_use]
    pub fn parent_of(&self, node: NodeHandle) -> Option<Option<NodeHandle>> {
        self.parents.get(&node).copied()
    }

    /// Ordered children of `parent` (`None` is the root).
    #[must_use]
    pub fn children_of(&self, parent: Option<NodeHandle>) -> &[NodeHandle] {
        self.children.get(&parent).map_or(&[], Vec::as_slice)
    }

    /// Row of `node` within `parent`'s children, if present.
    #[must_use]
    pub fn row_of(&self, parent: Option<NodeHandle>, node: NodeHandle) -> Option<usize> {
        self.children_of(parent).iter().position(|&child| child == node)
    }

    /// Current position of `node`, or `None` if any link of its parent chain
    /// cannot be resolved.
    #[must_use]
    pub fn index_for(&self, node: NodeHandle) -> Option<Position> {
        let mut current = node;
        let mut hops = 0_usize;
        loop {
            let parent = self.parent_of(current)?;
            self.row_of(parent, current)?;
            match parent {
                None => break,
                Some(next) => current = next,
            }
            hops += 1;
            if hops > self.parents.len() {
                return None;
            }
        }

        let parent = self.parent_of(node)?;
        let row = self.row_of(parent, node)?;
        Some(Position { row, node })
    }

    /// Position of a parent key: `Some(None)` for the root, `Some(Some(_))`
    /// for a resolvable node, `None` when the node cannot be resolved.
    #[must_use]
    pub fn parent_position(&self, parent: Option<NodeHandle>) -> Option<Option<Position>> {
        match parent {
            None => Some(None),
            Some(node) => self.index_for(node).map(Some),
        }
    }

    /// Number of children under `parent` (`None` is the root).
    #[must_use]
    pub fn children_count(&self, parent: Option<&Position>) -> usize {
        self.children_of(parent.map(|p| p.node)).len()
    }

    /// Child at `row` under `parent`; `None` when out of range or unknown.
    #[must_use]
    pub fn child_at(&self, parent: Option<&Position>, row: usize) -> Option<Position> {
        self.children_of(parent.map(|p| p.node))
            .get(row)
            .map(|&node| Position { row, node })
    }

    /// Position of the parent of `position`; `None` for top-level rows.
    #[must_use]
    pub fn parent(&self, position: &Position) -> Option<Position> {
        self.parent_of(position.node)
            .flatten()
            .and_then(|parent| self.index_for(parent))
    }

    /// Whether `node` is `ancestor` or lies somewhere beneath it.
    #[must_use]
    pub fn is_within(&self, node: NodeHandle, ancestor: NodeHandle) -> bool {
        let mut current = Some(node);
        let mut hops = 0_usize;
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.parents.len() {
                return false;
            }
            current = self.parent_of(candidate).flatten();
        }
        false
    }

    /// Sorted snapshot of the child → parent map.
    #[must_use]
    pub fn parent_map(&self) -> BTreeMap<NodeHandle, Option<NodeHandle>> {
        self.parents.iter().map(|(&k, &v)| (k, v)).collect()
    }

    /// Sorted snapshot of every non-empty children list.
    #[must_use]
    pub fn children_map(&self) -> BTreeMap<Option<NodeHandle>, Vec<NodeHandle>> {
        self.children
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(&k, v)| (k, v.clone()))
            .collect()
    }

    /// Depth-first, pre-order walk from the root: `(depth, position)` pairs.
    #[must_use]
    pub fn walk(&self) -> Vec<(usize, Position)> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack: Vec<(usize, Position)> = self
            .children_of(None)
            .iter()
            .enumerate()
            .rev()
            .map(|(row, &node)| (0, Position { row, node }))
            .collect();
        let mut seen = HashSet::new();

        while let Some((depth, position)) = stack.pop() {
            if !seen.insert(position.node) {
                continue;
            }
            out.push((depth, position));
            let kids = self.children_of(Some(position.node));
            for (row, &node) in kids.iter().enumerate().rev() {
                stack.push((depth + 1, Position { row, node }));
            }
        }
        out
    }

    /// Check every index invariant.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConsistencyError`] found.
    pub fn verify(&self) -> Result<(), ConsistencyError> {
        for (&node, &parent) in &self.parents {
            let occurrences = self
                .children_of(parent)
                .iter()
                .filter(|&&child| child == node)
                .count();
            match occurrences {
                0 => return Err(ConsistencyError::MissingChild { node, parent }),
                1 => {}
                _ => {
                    return Err(ConsistencyError::DuplicateChild {
                        node,
                        parent,
                        occurrences,
                    });
                }
            }
        }

        for (&key, list) in &self.children {
            if let Some(parent) = key {
                if !list.is_empty() && !self.parents.contains_key(&parent) {
                    return Err(ConsistencyError::OrphanedChildren {
                        parent,
                        count: list.len(),
                    });
                }
            }
            for &child in list {
                let recorded = self.parent_of(child);
                if recorded != Some(key) {
                    return Err(ConsistencyError::MissingParent {
                        node: child,
                        listed_under: key,
                        recorded,
                    });
                }
            }
        }

        let mut reached: HashSet<NodeHandle> = HashSet::with_capacity(self.len());
        let mut queue: VecDeque<NodeHandle> = self.children_of(None).iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            if reached.insert(node) {
                queue.extend(self.children_of(Some(node)).iter().copied());
            }
        }
        if let Some(&node) = self.parents.keys().find(|node| !reached.contains(node)) {
            return Err(ConsistencyError::Unreachable { node });
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutation (engine only)
    // -----------------------------------------------------------------------

    /// Append `node` under `parent` and record the back-reference.
    pub(crate) fn append_child(&mut self, parent: Option<NodeHandle>, node: NodeHandle) -> usize {
        let list = self.children.entry(parent).or_default();
        list.push(node);
        self.parents.insert(node, parent);
        list.len() - 1
    }

    /// Drop the first occurrence of `node` from `parent`'s children. The
    /// back-reference is left untouched.
    pub(crate) fn detach_row(&mut self, parent: Option<NodeHandle>, node: NodeHandle) -> Option<usize> {
        let list = self.children.get_mut(&parent)?;
        let row = list.iter().position(|&child| child == node)?;
        list.remove(row);
        if list.is_empty() {
            self.children.remove(&parent);
        }
        Some(row)
    }

    /// Erase `node` and everything indexed beneath it from both maps.
    /// The node's own row must already be detached. Returns the erased
    /// handles in pre-order, `node` first.
    pub(crate) fn erase_subtree(&mut self, node: NodeHandle) -> Vec<NodeHandle> {
        let mut erased = Vec::new();
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            if self.parents.remove(&current).is_some() {
                erased.push(current);
            }
            if let Some(kids) = self.children.remove(&Some(current)) {
                pending.extend(kids.into_iter().rev());
            }
        }
        erased
    }
}
