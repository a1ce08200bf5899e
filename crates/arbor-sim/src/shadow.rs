//! Observer that rebuilds the tree purely from structural notifications.
//!
//! It plays the part of a fully expanded view: an inserted row pulls in the
//! subtree the index reports under it, and a removed row drops its subtree
//! unless the node is still shown elsewhere (the second half of a move).
//! Along the way it checks the notification protocol against the index
//! snapshot each callback receives.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arbor_core::{NodeHandle, Position, TreeIndex, TreeObserver};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Insert,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct Open {
    phase: Phase,
    parent: Option<NodeHandle>,
    first: usize,
    count_before: usize,
}

#[derive(Debug, Default)]
struct ShadowState {
    rows: BTreeMap<Option<NodeHandle>, Vec<NodeHandle>>,
    shown: HashMap<NodeHandle, usize>,
    open: Option<Open>,
    notifications: u64,
    violations: Vec<String>,
}

/// What the shadow ended up with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowReport {
    /// Children lists rebuilt from notifications (non-empty lists only).
    pub rows: BTreeMap<Option<NodeHandle>, Vec<NodeHandle>>,
    /// Callbacks received.
    pub notifications: u64,
    /// Protocol problems seen, in order.
    pub violations: Vec<String>,
}

/// Shared-state notification replayer; clones see the same shadow.
#[derive(Debug, Clone, Default)]
pub struct ShadowObserver {
    state: Arc<Mutex<ShadowState>>,
}

impl ShadowObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ShadowReport {
        let state = self.state.lock();
        let mut violations = state.violations.clone();
        if let Some(open) = state.open {
            violations.push(format!("unterminated {:?} under {:?}", open.phase, open.parent));
        }
        ShadowReport {
            rows: state.rows.clone(),
            notifications: state.notifications,
            violations,
        }
    }
}

fn key(parent: Option<&Position>) -> Option<NodeHandle> {
    parent.map(|p| p.node())
}

impl ShadowState {
    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    /// The position handed to a callback must match the index it came with.
    fn check_parent(&mut self, tree: &TreeIndex, parent: Option<&Position>, when: &str) {
        if let Some(pos) = parent {
            if tree.index_for(pos.node()) != Some(*pos) {
                self.violation(format!("{when}: stale parent position {pos:?}"));
            }
        }
    }

    fn begin(&mut self, phase: Phase, tree: &TreeIndex, parent: Option<&Position>, first: usize, last: usize) {
        self.notifications += 1;
        if let Some(open) = self.open {
            self.violation(format!("begin {phase:?} while {:?} still open", open.phase));
        }
        if first != last {
            self.violation(format!("{phase:?} spans rows {first}..={last}"));
        }
        self.check_parent(tree, parent, "begin");
        self.open = Some(Open {
            phase,
            parent: key(parent),
            first,
            count_before: tree.children_count(parent),
        });
    }

    fn end(&mut self, phase: Phase, tree: &TreeIndex, parent: Option<&Position>, first: usize) -> bool {
        self.notifications += 1;
        self.check_parent(tree, parent, "end");
        match self.open.take() {
            Some(open) if open.phase == phase && open.parent == key(parent) && open.first == first => {
                let expected = match phase {
                    Phase::Insert => open.count_before + 1,
                    Phase::Remove => open.count_before.saturating_sub(1),
                };
                let actual = tree.children_count(parent);
                if actual != expected {
                    self.violation(format!(
                        "{phase:?} under {:?}: {} rows before, {actual} after",
                        open.parent, open.count_before
                    ));
                }
                true
            }
            other => {
                self.violation(format!("end {phase:?} does not match open {other:?}"));
                false
            }
        }
    }

    fn show(&mut self, parent: Option<NodeHandle>, row: usize, node: NodeHandle, tree: &TreeIndex) {
        let list = self.rows.entry(parent).or_default();
        if row > list.len() {
            self.violations
                .push(format!("insert of {node} at row {row} past end of shadow list"));
            return;
        }
        list.insert(row, node);
        let already_shown = self.shown.get(&node).copied().unwrap_or(0) > 0;
        *self.shown.entry(node).or_default() += 1;

        if !already_shown {
            // Expanding a freshly shown row fetches its subtree.
            let mut pending = vec![node];
            while let Some(current) = pending.pop() {
                let kids = tree.children_of(Some(current)).to_vec();
                for &kid in &kids {
                    *self.shown.entry(kid).or_default() += 1;
                }
                pending.extend(kids.iter().copied());
                if !kids.is_empty() {
                    self.rows.insert(Some(current), kids);
                }
            }
        }
    }

    fn hide(&mut self, parent: Option<NodeHandle>, row: usize, expected: Option<NodeHandle>) {
        let Some(list) = self.rows.get_mut(&parent) else {
            self.violations.push(format!("remove under {parent:?} with no shadow rows"));
            return;
        };
        if row >= list.len() {
            self.violations.push(format!("remove of row {row} past end of shadow list"));
            return;
        }
        let node = list.remove(row);
        if list.is_empty() {
            self.rows.remove(&parent);
        }
        if expected != Some(node) {
            self.violations.push(format!(
                "removed row {row} shows {node} in shadow but {expected:?} in index"
            ));
        }

        let remaining = self.unshow(node);
        if remaining == 0 {
            let mut pending = vec![node];
            while let Some(current) = pending.pop() {
                if let Some(kids) = self.rows.remove(&Some(current)) {
                    for &kid in &kids {
                        self.unshow(kid);
                    }
                    pending.extend(kids);
                }
            }
        }
    }

    fn unshow(&mut self, node: NodeHandle) -> usize {
        match self.shown.get_mut(&node) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            _ => {
                self.shown.remove(&node);
                0
            }
        }
    }
}

impl TreeObserver for ShadowObserver {
    fn rows_about_to_be_inserted(
        &mut self,
        tree: &TreeIndex,
        parent: Option<&Position>,
        first: usize,
        last: usize,
    ) {
        let mut state = self.state.lock();
        state.begin(Phase::Insert, tree, parent, first, last);
        if tree.children_count(parent) != first {
            state.violation(format!(
                "insert at row {first} but parent has {} rows",
                tree.children_count(parent)
            ));
        }
    }

    fn rows_inserted(&mut self, tree: &TreeIndex, parent: Option<&Position>, first: usize, _last: usize) {
        let mut state = self.state.lock();
        if !state.end(Phase::Insert, tree, parent, first) {
            return;
        }
        match tree.child_at(parent, first) {
            Some(child) => state.show(key(parent), first, child.node(), tree),
            None => state.violation(format!("inserted row {first} missing from index")),
        }
    }

    fn rows_about_to_be_removed(
        &mut self,
        tree: &TreeIndex,
        parent: Option<&Position>,
        first: usize,
        last: usize,
    ) {
        let mut state = self.state.lock();
        state.begin(Phase::Remove, tree, parent, first, last);
        // Old state: the row must still be there for the view to drop it.
        let expected = tree.child_at(parent, first).map(Position::node);
        if expected.is_none() {
            state.violation(format!("removing row {first} that the index does not have"));
        }
        state.hide(key(parent), first, expected);
    }

    fn rows_removed(&mut self, tree: &TreeIndex, parent: Option<&Position>, first: usize, _last: usize) {
        let mut state = self.state.lock();
        state.end(Phase::Remove, tree, parent, first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{ObjectLock, ObjectRegistry, TreeProjection};

    fn setup() -> (Arc<ObjectRegistry>, TreeProjection<ObjectRegistry>, ShadowObserver) {
        let registry = Arc::new(ObjectRegistry::new(ObjectLock::new()));
        let engine = TreeProjection::new(Arc::clone(&registry), registry.lock().clone());
        let shadow = ShadowObserver::new();
        engine.subscribe(shadow.clone());
        (registry, engine, shadow)
    }

    #[test]
    fn shadow_tracks_adds_moves_and_removals() {
        let (registry, engine, shadow) = setup();
        let events = registry.subscribe();
        let a = registry.create(None).expect("a");
        let b = registry.create(None).expect("b");
        let c = registry.create(Some(a)).expect("c");
        let d = registry.create(Some(c)).expect("d");
        registry.reparent(c, Some(b)).expect("move c");
        registry.destroy(a).expect("destroy a");
        for event in events.try_iter() {
            engine.apply(event);
        }

        let report = shadow.report();
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.rows, engine.snapshot().children_map());
        assert_eq!(report.rows.get(&Some(c)), Some(&vec![d]));
    }

    #[test]
    fn healed_ancestors_replay_cleanly() {
        let (registry, engine, shadow) = setup();
        let events = registry.subscribe();
        let a = registry.create(None).expect("a");
        let b = registry.create(Some(a)).expect("b");
        registry.create(Some(b)).expect("c");
        let batch: Vec<_> = events.try_iter().collect();
        for event in batch.into_iter().rev() {
            engine.apply(event);
        }

        let report = shadow.report();
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.rows, engine.snapshot().children_map());
        assert_eq!(report.notifications, 6);
    }

    #[test]
    fn mismatched_pair_is_reported() {
        let mut shadow = ShadowObserver::new();
        let tree = TreeIndex::new();
        shadow.rows_about_to_be_inserted(&tree, None, 0, 0);
        shadow.rows_about_to_be_removed(&tree, None, 0, 0);
        let report = shadow.report();
        assert!(report.violations.iter().any(|v| v.contains("still open")));
    }
}
