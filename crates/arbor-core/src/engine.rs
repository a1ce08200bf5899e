//! Tree projection engine.
//!
//! [`TreeProjection`] turns the source graph's lifecycle events into a live,
//! incrementally maintained [`TreeIndex`] and brackets every structural edit
//! with observer notifications.
//!
//! # Event application
//!
//! - **Added** re-checks liveness, ignores duplicates, inserts missing
//!   ancestors on demand (a child's notification may overtake its parent's),
//!   then appends the node under its reported parent.
//! - **Removed** does not re-check the node's liveness. It drops the node's
//!   row and everything indexed beneath it; unknown nodes are ignored. Live
//!   descendants caught in a dead node's subtree are re-added where the source
//!   graph now places them.
//! - **Reparented** re-inserts a live node under its new parent first and then
//!   removes its old row, all under one exclusive lock acquisition. A dead
//!   node is only removed.
//!
//! Anomalies caused by reordering or duplication are resolved as no-ops and
//! reported through [`ApplyOutcome::Ignored`], never as errors.
//!
//! # Locking
//!
//! Event handlers hold the injected [`ObjectLock`] exclusively across the
//! liveness check and the mutation; queries hold it shared. Lock order is
//! object lock, then the engine's own state, then whatever the source graph
//! locks internally.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::config::ProjectionConfig;
use crate::format::{self, AddressFormatter, NodeData, NodeFormatter};
use crate::handle::NodeHandle;
use crate::index::{ConsistencyError, Position, TreeIndex};
use crate::lock::ObjectLock;
use crate::observer::TreeObserver;
use crate::source::{LifecycleEvent, SourceGraph};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an event left the projection untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The node was already dead when the event was processed.
    NotLive,
    /// The node is already indexed.
    Duplicate,
    /// Removal of a node the projection never indexed.
    NotIndexed,
    /// The node's recorded parent or row could not be resolved.
    UnreachableParent,
    /// The reported parent chain is dead or cyclic.
    UnplaceableParent,
}

/// What applying one lifecycle event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Inserted {
        parent: Option<NodeHandle>,
        row: usize,
    },
    Removed {
        parent: Option<NodeHandle>,
        row: usize,
    },
    Moved {
        from: Option<NodeHandle>,
        to: Option<NodeHandle>,
    },
    Ignored {
        reason: IgnoreReason,
    },
}

impl ApplyOutcome {
    const fn ignored(reason: IgnoreReason) -> Self {
        Self::Ignored { reason }
    }

    /// Whether the event changed the projection.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        !matches!(self, Self::Ignored { .. })
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted { row, .. } => write!(f, "inserted at row {row}"),
            Self::Removed { row, .. } => write!(f, "removed from row {row}"),
            Self::Moved { .. } => write!(f, "moved"),
            Self::Ignored { reason } => write!(f, "ignored ({reason:?})"),
        }
    }
}

/// Cumulative counters over every applied event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
    pub events: u64,
    pub inserted: u64,
    pub removed: u64,
    pub moved: u64,
    pub ignored_not_live: u64,
    pub ignored_duplicate: u64,
    pub ignored_not_indexed: u64,
    pub ignored_unreachable_parent: u64,
    pub ignored_unplaceable_parent: u64,
    /// Ancestors inserted on demand ahead of their own `Added` event.
    pub ancestors_healed: u64,
    /// Stale ancestors moved out of a subtree to keep a reparent acyclic.
    pub ancestors_relocated: u64,
    /// Descendants erased together with a removed node.
    pub descendants_erased: u64,
    /// Live descendants re-added after their stale ancestor was removed.
    pub descendants_salvaged: u64,
    /// Before/after notification pairs emitted.
    pub notification_pairs: u64,
}

impl ApplyStats {
    /// Total number of ignored events.
    #[must_use]
    pub const fn ignored(&self) -> u64 {
        self.ignored_not_live
            + self.ignored_duplicate
            + self.ignored_not_indexed
            + self.ignored_unreachable_parent
            + self.ignored_unplaceable_parent
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        self.events += 1;
        match outcome {
            ApplyOutcome::Inserted { .. } => self.inserted += 1,
            ApplyOutcome::Removed { .. } => self.removed += 1,
            ApplyOutcome::Moved { .. } => self.moved += 1,
            ApplyOutcome::Ignored { reason } => match reason {
                IgnoreReason::NotLive => self.ignored_not_live += 1,
                IgnoreReason::Duplicate => self.ignored_duplicate += 1,
                IgnoreReason::NotIndexed => self.ignored_not_indexed += 1,
                IgnoreReason::UnreachableParent => self.ignored_unreachable_parent += 1,
                IgnoreReason::UnplaceableParent => self.ignored_unplaceable_parent += 1,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// State behind the engine's own lock
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProjectionState {
    index: TreeIndex,
    observers: Vec<Box<dyn TreeObserver>>,
    stats: ApplyStats,
}

impl ProjectionState {
    /// Append `node` under `parent`, bracketed by an insert pair. `None` if
    /// the parent's position cannot be resolved.
    fn insert_row(&mut self, parent: Option<NodeHandle>, node: NodeHandle) -> Option<usize> {
        let parent_pos = self.index.parent_position(parent)?;
        let row = self.index.children_of(parent).len();

        for observer in &mut self.observers {
            observer.rows_about_to_be_inserted(&self.index, parent_pos.as_ref(), row, row);
        }
        self.index.append_child(parent, node);
        for observer in &mut self.observers {
            observer.rows_inserted(&self.index, parent_pos.as_ref(), row, row);
        }

        self.stats.notification_pairs += 1;
        trace!(%node, parent = ?parent, row, "row inserted");
        Some(row)
    }

    /// Drop `node`'s row under `parent`, bracketed by a remove pair. With
    /// `erase` the node and its indexed subtree leave both maps and the
    /// erased handles are returned; without it only the row goes (the node
    /// has already been re-inserted elsewhere).
    fn remove_row(
        &mut self,
        parent: Option<NodeHandle>,
        node: NodeHandle,
        erase: bool,
    ) -> Option<(usize, Vec<NodeHandle>)> {
        let parent_pos = self.index.parent_position(parent)?;
        let row = self.index.row_of(parent, node)?;

        for observer in &mut self.observers {
            observer.rows_about_to_be_removed(&self.index, parent_pos.as_ref(), row, row);
        }
        self.index.detach_row(parent, node);
        let erased = if erase {
            self.index.erase_subtree(node)
        } else {
            Vec::new()
        };
        for observer in &mut self.observers {
            observer.rows_removed(&self.index, parent_pos.as_ref(), row, row);
        }

        self.stats.notification_pairs += 1;
        trace!(%node, parent = ?parent, row, erase, "row removed");
        Some((row, erased))
    }

    /// Insert `node` under `to`, then drop its old row under `from`. The
    /// node's indexed subtree travels with it.
    fn move_row(&mut self, from: Option<NodeHandle>, to: Option<NodeHandle>, node: NodeHandle) -> Option<usize> {
        let row = self.insert_row(to, node)?;
        if self.remove_row(from, node, false).is_none() {
            // Old row unresolvable: drop it silently rather than leave the
            // node listed twice.
            error!(%node, from = ?from, "old row of moved node could not be resolved");
            self.index.detach_row(from, node);
        }
        Some(row)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Live tree projection over a [`SourceGraph`].
pub struct TreeProjection<S> {
    source: Arc<S>,
    lock: ObjectLock,
    state: RwLock<ProjectionState>,
    formatter: Arc<dyn NodeFormatter>,
    config: ProjectionConfig,
}

impl<S: SourceGraph> TreeProjection<S> {
    /// Project `source`, coordinating through `lock` (the same lock the
    /// source graph's producer takes while mutating).
    pub fn new(source: Arc<S>, lock: ObjectLock) -> Self {
        Self::with_config(source, lock, ProjectionConfig::default())
    }

    pub fn with_config(source: Arc<S>, lock: ObjectLock, config: ProjectionConfig) -> Self {
        Self {
            source,
            lock,
            state: RwLock::new(ProjectionState::default()),
            formatter: Arc::new(AddressFormatter),
            config,
        }
    }

    /// Replace the display formatter.
    #[must_use]
    pub fn with_formatter(mut self, formatter: Arc<dyn NodeFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub const fn lock(&self) -> &ObjectLock {
        &self.lock
    }

    pub const fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Register an observer for all future structural notifications.
    pub fn subscribe(&self, observer: impl TreeObserver + 'static) {
        let _guard = self.lock.write();
        self.state.write().observers.push(Box::new(observer));
    }

    // -----------------------------------------------------------------------
    // Update surface
    // -----------------------------------------------------------------------

    /// Apply one lifecycle event.
    pub fn apply(&self, event: LifecycleEvent) -> ApplyOutcome {
        match event {
            LifecycleEvent::Added(node) => self.handle_added(node),
            LifecycleEvent::Removed(node) => self.handle_removed(node),
            LifecycleEvent::Reparented(node) => self.handle_reparented(node),
        }
    }

    /// A node was reported live.
    pub fn handle_added(&self, node: NodeHandle) -> ApplyOutcome {
        let _guard = self.lock.write();
        let mut state = self.state.write();
        let outcome = self.added_locked(&mut state, node);
        self.finish(&mut state, LifecycleEvent::Added(node), outcome)
    }

    /// A node was destroyed.
    pub fn handle_removed(&self, node: NodeHandle) -> ApplyOutcome {
        let _guard = self.lock.write();
        let mut state = self.state.write();
        let outcome = self.removed_locked(&mut state, node);
        self.finish(&mut state, LifecycleEvent::Removed(node), outcome)
    }

    /// A node changed parent.
    pub fn handle_reparented(&self, node: NodeHandle) -> ApplyOutcome {
        let _guard = self.lock.write();
        let mut state = self.state.write();
        let outcome = self.reparented_locked(&mut state, node);
        self.finish(&mut state, LifecycleEvent::Reparented(node), outcome)
    }

    fn added_locked(&self, state: &mut ProjectionState, node: NodeHandle) -> ApplyOutcome {
        if !self.source.is_valid(node) {
            return ApplyOutcome::ignored(IgnoreReason::NotLive);
        }
        if state.index.contains(node) {
            return ApplyOutcome::ignored(IgnoreReason::Duplicate);
        }

        let parent = self.source.parent_of(node);
        if !self.place_chain(state, parent, None) {
            return ApplyOutcome::ignored(IgnoreReason::UnplaceableParent);
        }
        state.insert_row(parent, node).map_or(
            ApplyOutcome::ignored(IgnoreReason::UnplaceableParent),
            |row| ApplyOutcome::Inserted { parent, row },
        )
    }

    fn removed_locked(&self, state: &mut ProjectionState, node: NodeHandle) -> ApplyOutcome {
        let Some(parent) = state.index.parent_of(node) else {
            return ApplyOutcome::ignored(IgnoreReason::NotIndexed);
        };
        let Some((row, erased)) = state.remove_row(parent, node, true) else {
            return ApplyOutcome::ignored(IgnoreReason::UnreachableParent);
        };

        let descendants: Vec<NodeHandle> = erased.into_iter().filter(|&n| n != node).collect();
        state.stats.descendants_erased += descendants.len() as u64;
        if !self.source.is_valid(node) {
            self.salvage(state, &descendants);
        }
        ApplyOutcome::Removed { parent, row }
    }

    /// Re-add live nodes erased beneath a dead ancestor. A live node only sits
    /// under a dead one in the index while its own `Reparented` event is
    /// still in flight, and that event may already have been applied.
    fn salvage(&self, state: &mut ProjectionState, erased: &[NodeHandle]) {
        for &node in erased {
            if !self.source.is_valid(node) || state.index.contains(node) {
                continue;
            }
            if self.added_locked(state, node).is_structural() {
                state.stats.descendants_salvaged += 1;
                debug!(%node, "re-added live descendant of removed node");
            }
        }
    }

    fn reparented_locked(&self, state: &mut ProjectionState, node: NodeHandle) -> ApplyOutcome {
        if !self.source.is_valid(node) {
            return self.removed_locked(state, node);
        }
        if !state.index.contains(node) {
            // Nothing to remove afterwards.
            return self.added_locked(state, node);
        }

        let new_parent = self.source.parent_of(node);
        if self.place_chain(state, new_parent, Some(node)) {
            if let Some(old_parent) = state.index.parent_of(node) {
                if state.move_row(old_parent, new_parent, node).is_some() {
                    return ApplyOutcome::Moved {
                        from: old_parent,
                        to: new_parent,
                    };
                }
            }
        }

        debug!(%node, new_parent = ?new_parent, "new parent unplaceable; dropping stale row");
        self.removed_locked(state, node)
    }

    /// Make sure the source-graph ancestor chain starting at `start` is
    /// indexed, inserting missing ancestors root-first.
    ///
    /// With an `anchor`, chain members currently indexed inside the anchor's
    /// subtree are moved out to where the source graph now places them, so
    /// the anchor can be re-parented under `start` without a cycle.
    ///
    /// Returns `false` when the chain contains a dead node or a cycle.
    fn place_chain(
        &self,
        state: &mut ProjectionState,
        start: Option<NodeHandle>,
        anchor: Option<NodeHandle>,
    ) -> bool {
        let mut pending: Vec<(NodeHandle, Option<NodeHandle>)> = Vec::new();
        let mut current = start;

        while let Some(node) = current {
            if Some(node) == anchor {
                return false;
            }
            let inside_anchor = anchor.is_some_and(|a| state.index.is_within(node, a));
            if state.index.contains(node) && !inside_anchor {
                break;
            }
            if !self.source.is_valid(node) || pending.iter().any(|&(seen, _)| seen == node) {
                return false;
            }
            let parent = self.source.parent_of(node);
            pending.push((node, parent));
            current = parent;
        }

        for (node, parent) in pending.into_iter().rev() {
            match state.index.parent_of(node) {
                Some(old_parent) => {
                    if state.move_row(old_parent, parent, node).is_none() {
                        return false;
                    }
                    state.stats.ancestors_relocated += 1;
                    debug!(%node, parent = ?parent, "relocated stale ancestor");
                }
                None => {
                    if state.insert_row(parent, node).is_none() {
                        return false;
                    }
                    state.stats.ancestors_healed += 1;
                    debug!(%node, parent = ?parent, "inserted ancestor ahead of its own event");
                }
            }
        }
        true
    }

    fn finish(
        &self,
        state: &mut ProjectionState,
        event: LifecycleEvent,
        outcome: ApplyOutcome,
    ) -> ApplyOutcome {
        state.stats.record(outcome);
        match outcome {
            ApplyOutcome::Ignored { reason } => {
                debug!(%event, reason = ?reason, "lifecycle event ignored");
            }
            _ => trace!(%event, %outcome, "lifecycle event applied"),
        }

        if cfg!(debug_assertions) || self.config.verify.after_each_event {
            let checked = state.index.verify();
            if let Err(err) = &checked {
                error!(%event, code = %err.code(), "projection index inconsistent: {err}");
            }
            debug_assert!(checked.is_ok(), "index inconsistent after {event}: {checked:?}");
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Query surface
    // -----------------------------------------------------------------------

    /// Run `f` against the index under one shared acquisition.
    pub fn with_index<R>(&self, f: impl FnOnce(&TreeIndex) -> R) -> R {
        let _guard = self.lock.read();
        let state = self.state.read();
        f(&state.index)
    }

    /// Current position of `node`.
    pub fn index_for(&self, node: NodeHandle) -> Option<Position> {
        self.with_index(|index| index.index_for(node))
    }

    /// Number of rows under `parent` (`None` is the root).
    pub fn children_count(&self, parent: Option<&Position>) -> usize {
        self.with_index(|index| index.children_count(parent))
    }

    /// Row `row` under `parent`.
    pub fn child_at(&self, parent: Option<&Position>, row: usize) -> Option<Position> {
        self.with_index(|index| index.child_at(parent, row))
    }

    /// Parent position of `position`.
    pub fn parent(&self, position: &Position) -> Option<Position> {
        self.with_index(|index| index.parent(position))
    }

    /// Ordered children of `parent` by handle.
    pub fn children_of(&self, parent: Option<NodeHandle>) -> Vec<NodeHandle> {
        self.with_index(|index| index.children_of(parent).to_vec())
    }

    /// Recorded parent of `node`: `None` if unindexed, `Some(None)` at the root.
    pub fn parent_of(&self, node: NodeHandle) -> Option<Option<NodeHandle>> {
        self.with_index(|index| index.parent_of(node))
    }

    pub fn contains(&self, node: NodeHandle) -> bool {
        self.with_index(|index| index.contains(node))
    }

    pub fn len(&self) -> usize {
        self.with_index(TreeIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.with_index(TreeIndex::is_empty)
    }

    pub fn column_count(&self) -> usize {
        self.formatter.column_count()
    }

    /// Display data for one cell.
    ///
    /// Liveness is re-checked under the shared lock before the formatter is
    /// consulted; an indexed node that is no longer live yields
    /// [`NodeData::Dangling`] and is never handed to the formatter. Returns
    /// `None` for an unknown node or an out-of-range column.
    pub fn data(&self, position: &Position, column: usize) -> Option<NodeData> {
        if column >= self.formatter.column_count() {
            return None;
        }

        let node = position.node();
        let _guard = self.lock.read();
        let state = self.state.read();
        if !state.index.contains(node) {
            return None;
        }

        if self.source.is_valid(node) {
            Some(
                self.formatter
                    .format(node, column)
                    .map_or(NodeData::Empty, NodeData::Live),
            )
        } else {
            Some(format::dangling(
                node,
                column,
                &self.config.display.deleted_placeholder,
            ))
        }
    }

    /// Owned copy of the current index.
    pub fn snapshot(&self) -> TreeIndex {
        self.with_index(Clone::clone)
    }

    pub fn stats(&self) -> ApplyStats {
        let _guard = self.lock.read();
        self.state.read().stats.clone()
    }

    /// Run the full consistency check now.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConsistencyError`] found.
    pub fn verify(&self) -> Result<(), ConsistencyError> {
        self.with_index(TreeIndex::verify)
    }
}

impl<S> fmt::Debug for TreeProjection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("TreeProjection")
            .field("nodes", &state.index.len())
            .field("observers", &state.observers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ChangeRecorder, StructuralChange};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Source graph whose state the test edits directly, without events.
    #[derive(Default)]
    struct FakeGraph {
        live: Mutex<HashMap<NodeHandle, Option<NodeHandle>>>,
    }

    impl FakeGraph {
        fn set(&self, node: u64, parent: Option<u64>) {
            self.live.lock().insert(h(node), parent.map(h));
        }

        fn kill(&self, node: u64) {
            self.live.lock().remove(&h(node));
        }
    }

    impl SourceGraph for FakeGraph {
        fn is_valid(&self, node: NodeHandle) -> bool {
            self.live.lock().contains_key(&node)
        }

        fn parent_of(&self, node: NodeHandle) -> Option<NodeHandle> {
            self.live.lock().get(&node).copied().flatten()
        }
    }

    fn h(raw: u64) -> NodeHandle {
        NodeHandle::from_raw(raw)
    }

    fn engine() -> (Arc<FakeGraph>, TreeProjection<FakeGraph>, ChangeRecorder) {
        let graph = Arc::new(FakeGraph::default());
        let engine = TreeProjection::new(Arc::clone(&graph), ObjectLock::new());
        let recorder = ChangeRecorder::new();
        engine.subscribe(recorder.clone());
        (graph, engine, recorder)
    }

    fn insert_pair(parent: Option<u64>, row: usize) -> [StructuralChange; 2] {
        let parent = parent.map(h);
        [
            StructuralChange::BeginInsert { parent, first: row, last: row },
            StructuralChange::EndInsert { parent, first: row, last: row },
        ]
    }

    fn remove_pair(parent: Option<u64>, row: usize) -> [StructuralChange; 2] {
        let parent = parent.map(h);
        [
            StructuralChange::BeginRemove { parent, first: row, last: row },
            StructuralChange::EndRemove { parent, first: row, last: row },
        ]
    }

    #[test]
    fn added_appends_under_reported_parent() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        graph.set(2, Some(1));

        assert_eq!(
            engine.handle_added(h(1)),
            ApplyOutcome::Inserted { parent: None, row: 0 }
        );
        assert_eq!(
            engine.handle_added(h(2)),
            ApplyOutcome::Inserted { parent: Some(h(1)), row: 0 }
        );
        assert_eq!(engine.children_of(Some(h(1))), vec![h(2)]);
        assert_eq!(engine.parent_of(h(2)), Some(Some(h(1))));

        let mut expected = insert_pair(None, 0).to_vec();
        expected.extend(insert_pair(Some(1), 0));
        assert_eq!(recorder.changes(), expected);
    }

    #[test]
    fn added_for_dead_node_is_ignored() {
        let (_graph, engine, recorder) = engine();
        assert_eq!(
            engine.handle_added(h(7)),
            ApplyOutcome::Ignored { reason: IgnoreReason::NotLive }
        );
        assert!(engine.is_empty());
        assert!(recorder.is_empty());
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        engine.handle_added(h(1));
        let before = engine.snapshot();
        recorder.take();

        assert_eq!(
            engine.handle_added(h(1)),
            ApplyOutcome::Ignored { reason: IgnoreReason::Duplicate }
        );
        assert_eq!(engine.snapshot(), before);
        assert!(recorder.is_empty());
    }

    #[test]
    fn child_before_parent_inserts_ancestors_first() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        graph.set(2, Some(1));
        graph.set(3, Some(2));

        assert_eq!(
            engine.handle_added(h(3)),
            ApplyOutcome::Inserted { parent: Some(h(2)), row: 0 }
        );
        assert_eq!(engine.children_of(None), vec![h(1)]);
        assert_eq!(engine.children_of(Some(h(1))), vec![h(2)]);
        assert_eq!(engine.children_of(Some(h(2))), vec![h(3)]);
        assert_eq!(engine.stats().ancestors_healed, 2);

        let mut expected = insert_pair(None, 0).to_vec();
        expected.extend(insert_pair(Some(1), 0));
        expected.extend(insert_pair(Some(2), 0));
        assert_eq!(recorder.changes(), expected);

        // The ancestors' own events arrive late and are duplicates.
        assert_eq!(
            engine.handle_added(h(1)),
            ApplyOutcome::Ignored { reason: IgnoreReason::Duplicate }
        );
    }

    #[test]
    fn add_with_dead_parent_is_unplaceable() {
        let (graph, engine, _recorder) = engine();
        graph.set(2, Some(1));
        assert_eq!(
            engine.handle_added(h(2)),
            ApplyOutcome::Ignored { reason: IgnoreReason::UnplaceableParent }
        );
        assert!(engine.is_empty());
    }

    #[test]
    fn add_with_cyclic_source_chain_is_unplaceable() {
        let (graph, engine, _recorder) = engine();
        graph.set(1, Some(2));
        graph.set(2, Some(1));
        graph.set(3, Some(1));
        assert_eq!(
            engine.handle_added(h(3)),
            ApplyOutcome::Ignored { reason: IgnoreReason::UnplaceableParent }
        );
        assert!(engine.is_empty());
    }

    #[test]
    fn removed_drops_row_and_subtree() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        graph.set(2, Some(1));
        graph.set(3, Some(2));
        graph.set(4, None);
        engine.handle_added(h(3));
        engine.handle_added(h(4));
        recorder.take();

        graph.kill(1);
        assert_eq!(
            engine.handle_removed(h(1)),
            ApplyOutcome::Removed { parent: None, row: 0 }
        );
        assert_eq!(engine.children_of(None), vec![h(4)]);
        assert!(!engine.contains(h(2)));
        assert!(!engine.contains(h(3)));
        assert_eq!(engine.stats().descendants_erased, 2);
        assert_eq!(recorder.changes(), remove_pair(None, 0).to_vec());

        // Descendant removals arriving afterwards are no-ops.
        assert_eq!(
            engine.handle_removed(h(3)),
            ApplyOutcome::Ignored { reason: IgnoreReason::NotIndexed }
        );
    }

    #[test]
    fn removed_salvages_live_descendants_with_pending_reparent() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        graph.set(3, Some(1));
        engine.handle_added(h(3));
        recorder.take();

        // 3 moved under a fresh node 2, then 1 was destroyed. Removed(1)
        // overtakes both Added(2) and Reparented(3).
        graph.set(2, None);
        graph.set(3, Some(2));
        graph.kill(1);

        assert_eq!(
            engine.handle_removed(h(1)),
            ApplyOutcome::Removed { parent: None, row: 0 }
        );
        assert_eq!(engine.children_of(None), vec![h(2)]);
        assert_eq!(engine.children_of(Some(h(2))), vec![h(3)]);

        let stats = engine.stats();
        assert_eq!(stats.descendants_erased, 1);
        assert_eq!(stats.descendants_salvaged, 1);
        assert_eq!(stats.ancestors_healed, 2);

        let mut expected = remove_pair(None, 0).to_vec();
        expected.extend(insert_pair(None, 0));
        expected.extend(insert_pair(Some(2), 0));
        assert_eq!(recorder.changes(), expected);

        // The late events are now harmless.
        assert_eq!(
            engine.handle_added(h(2)),
            ApplyOutcome::Ignored { reason: IgnoreReason::Duplicate }
        );
        assert!(engine.handle_reparented(h(3)).is_structural());
        assert_eq!(engine.parent_of(h(3)), Some(Some(h(2))));
    }

    #[test]
    fn removed_does_not_consult_liveness() {
        let (graph, engine, _recorder) = engine();
        graph.set(1, None);
        engine.handle_added(h(1));
        // Still live according to the graph; removal goes through anyway.
        assert!(engine.handle_removed(h(1)).is_structural());
        assert!(engine.is_empty());
    }

    #[test]
    fn removal_of_unknown_node_is_silent() {
        let (_graph, engine, recorder) = engine();
        assert_eq!(
            engine.handle_removed(h(5)),
            ApplyOutcome::Ignored { reason: IgnoreReason::NotIndexed }
        );
        assert!(recorder.is_empty());
        assert_eq!(engine.stats().notification_pairs, 0);
    }

    #[test]
    fn reparent_inserts_before_removing() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        graph.set(2, None);
        graph.set(3, Some(1));
        for node in [1, 2, 3] {
            engine.handle_added(h(node));
        }
        recorder.take();

        graph.set(3, Some(2));
        assert_eq!(
            engine.handle_reparented(h(3)),
            ApplyOutcome::Moved { from: Some(h(1)), to: Some(h(2)) }
        );
        let mut expected = insert_pair(Some(2), 0).to_vec();
        expected.extend(remove_pair(Some(1), 0));
        assert_eq!(recorder.changes(), expected);
        assert_eq!(engine.children_of(Some(h(1))), Vec::<NodeHandle>::new());
        assert_eq!(engine.children_of(Some(h(2))), vec![h(3)]);
    }

    #[test]
    fn reparent_carries_subtree() {
        let (graph, engine, _recorder) = engine();
        graph.set(1, None);
        graph.set(2, Some(1));
        graph.set(3, Some(2));
        graph.set(4, None);
        engine.handle_added(h(3));
        engine.handle_added(h(4));

        graph.set(2, Some(4));
        engine.handle_reparented(h(2));
        assert_eq!(engine.children_of(Some(h(4))), vec![h(2)]);
        assert_eq!(engine.children_of(Some(h(2))), vec![h(3)]);
        let pos = engine.index_for(h(3)).expect("moved descendant still resolves");
        assert_eq!(engine.parent(&pos), engine.index_for(h(2)));
    }

    #[test]
    fn reparent_of_dead_node_only_removes() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        engine.handle_added(h(1));
        recorder.take();

        graph.kill(1);
        assert_eq!(
            engine.handle_reparented(h(1)),
            ApplyOutcome::Removed { parent: None, row: 0 }
        );
        assert_eq!(recorder.changes(), remove_pair(None, 0).to_vec());
    }

    #[test]
    fn reparent_of_unindexed_live_node_only_inserts() {
        let (graph, engine, recorder) = engine();
        graph.set(1, None);
        assert_eq!(
            engine.handle_reparented(h(1)),
            ApplyOutcome::Inserted { parent: None, row: 0 }
        );
        assert_eq!(recorder.changes(), insert_pair(None, 0).to_vec());
    }

    #[test]
    fn reparent_to_same_parent_moves_to_end() {
        let (graph, engine, _recorder) = engine();
        graph.set(1, None);
        graph.set(2, None);
        engine.handle_added(h(1));
        engine.handle_added(h(2));

        assert_eq!(
            engine.handle_reparented(h(1)),
            ApplyOutcome::Moved { from: None, to: None }
        );
        assert_eq!(engine.children_of(None), vec![h(2), h(1)]);
    }

    #[test]
    fn reparent_under_stale_descendant_relocates_it_first() {
        let (graph, engine, _recorder) = engine();
        // Index: 1 ─ 2. Source: 2 moved to the root, then 1 moved under 2,
        // and the Reparented(1) event overtook Reparented(2).
        graph.set(1, None);
        graph.set(2, Some(1));
        engine.handle_added(h(2));

        graph.set(2, None);
        graph.set(1, Some(2));
        assert_eq!(
            engine.handle_reparented(h(1)),
            ApplyOutcome::Moved { from: None, to: Some(h(2)) }
        );
        assert_eq!(engine.children_of(None), vec![h(2)]);
        assert_eq!(engine.children_of(Some(h(2))), vec![h(1)]);
        assert_eq!(engine.stats().ancestors_relocated, 1);
        assert_eq!(engine.verify(), Ok(()));

        // The overtaken event now just re-appends 2 at the root.
        assert!(engine.handle_reparented(h(2)).is_structural());
        assert_eq!(engine.children_of(None), vec![h(2)]);
    }

    #[test]
    fn reparent_with_unplaceable_parent_drops_stale_row() {
        let (graph, engine, _recorder) = engine();
        graph.set(1, None);
        engine.handle_added(h(1));

        // Reported parent is not live.
        graph.set(1, Some(9));
        assert_eq!(
            engine.handle_reparented(h(1)),
            ApplyOutcome::Removed { parent: None, row: 0 }
        );
        assert!(engine.is_empty());
    }

    #[test]
    fn data_degrades_for_dangling_nodes() {
        let (graph, engine, _recorder) = engine();
        graph.set(0x30, None);
        engine.handle_added(h(0x30));
        let pos = engine.index_for(h(0x30)).expect("indexed");

        assert_eq!(engine.data(&pos, 0), Some(NodeData::Live("0x30".into())));

        // Destroyed, but the Removed event has not been processed yet.
        graph.kill(0x30);
        assert_eq!(engine.data(&pos, 0), Some(NodeData::Dangling("0x30".into())));
        assert_eq!(engine.data(&pos, 1), None);
    }

    #[test]
    fn data_placeholder_fills_extra_columns() {
        struct TwoColumns;
        impl NodeFormatter for TwoColumns {
            fn column_count(&self) -> usize {
                2
            }
            fn format(&self, node: NodeHandle, column: usize) -> Option<String> {
                match column {
                    0 => Some(node.to_string()),
                    _ => Some("QObject".to_string()),
                }
            }
        }

        let graph = Arc::new(FakeGraph::default());
        let engine = TreeProjection::new(Arc::clone(&graph), ObjectLock::new())
            .with_formatter(Arc::new(TwoColumns));
        graph.set(1, None);
        engine.handle_added(h(1));
        let pos = engine.index_for(h(1)).expect("indexed");

        assert_eq!(engine.data(&pos, 1), Some(NodeData::Live("QObject".into())));
        graph.kill(1);
        assert_eq!(engine.data(&pos, 1), Some(NodeData::Dangling("<deleted>".into())));
    }

    #[test]
    fn data_for_unknown_position_is_none() {
        let (graph, engine, _recorder) = engine();
        graph.set(1, None);
        engine.handle_added(h(1));
        let pos = engine.index_for(h(1)).expect("indexed");
        engine.handle_removed(h(1));
        assert_eq!(engine.data(&pos, 0), None);
    }

    #[test]
    fn observers_see_old_state_before_and_new_state_after() {
        #[derive(Default)]
        struct Probe {
            seen: Arc<Mutex<Vec<(usize, usize)>>>,
        }
        impl TreeObserver for Probe {
            fn rows_about_to_be_inserted(
                &mut self,
                tree: &TreeIndex,
                parent: Option<&Position>,
                _first: usize,
                _last: usize,
            ) {
                self.seen.lock().push((0, tree.children_count(parent)));
            }
            fn rows_inserted(
                &mut self,
                tree: &TreeIndex,
                parent: Option<&Position>,
                _first: usize,
                _last: usize,
            ) {
                self.seen.lock().push((1, tree.children_count(parent)));
            }
        }

        let (graph, engine, _recorder) = engine();
        let probe = Probe::default();
        let seen = Arc::clone(&probe.seen);
        engine.subscribe(probe);

        graph.set(1, None);
        engine.handle_added(h(1));
        assert_eq!(*seen.lock(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn stats_count_every_outcome() {
        let (graph, engine, _recorder) = engine();
        graph.set(1, None);
        engine.apply(LifecycleEvent::Added(h(1)));
        engine.apply(LifecycleEvent::Added(h(1)));
        engine.apply(LifecycleEvent::Removed(h(2)));
        engine.apply(LifecycleEvent::Reparented(h(1)));
        engine.apply(LifecycleEvent::Removed(h(1)));

        let stats = engine.stats();
        assert_eq!(stats.events, 5);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.moved, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.ignored(), 2);
        assert_eq!(stats.notification_pairs, 4);
    }
}
