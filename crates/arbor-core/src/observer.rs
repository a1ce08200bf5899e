//! Structural change notifications.
//!
//! Every row insertion or removal is bracketed by a before/after pair. The
//! before-callback sees the old state and the after-callback the new one,
//! both through the `&TreeIndex` passed in. Callbacks run while the engine
//! holds the object lock exclusively, so an observer must read through that
//! view and never call back into the engine's locking queries.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::handle::NodeHandle;
use crate::index::{Position, TreeIndex};

/// Receiver of structural change notifications.
///
/// `parent` is `None` for rows at the root. `first..=last` is the affected
/// row range; the engine always reports exactly one row.
pub trait TreeObserver: Send + Sync {
    fn rows_about_to_be_inserted(
        &mut self,
        _tree: &TreeIndex,
        _parent: Option<&Position>,
        _first: usize,
        _last: usize,
    ) {
    }

    fn rows_inserted(
        &mut self,
        _tree: &TreeIndex,
        _parent: Option<&Position>,
        _first: usize,
        _last: usize,
    ) {
    }

    fn rows_about_to_be_removed(
        &mut self,
        _tree: &TreeIndex,
        _parent: Option<&Position>,
        _first: usize,
        _last: usize,
    ) {
    }

    fn rows_removed(
        &mut self,
        _tree: &TreeIndex,
        _parent: Option<&Position>,
        _first: usize,
        _last: usize,
    ) {
    }
}

/// One recorded notification, with the parent given by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum StructuralChange {
    BeginInsert {
        parent: Option<NodeHandle>,
        first: usize,
        last: usize,
    },
    EndInsert {
        parent: Option<NodeHandle>,
        first: usize,
        last: usize,
    },
    BeginRemove {
        parent: Option<NodeHandle>,
        first: usize,
        last: usize,
    },
    EndRemove {
        parent: Option<NodeHandle>,
        first: usize,
        last: usize,
    },
}

impl StructuralChange {
    /// Parent the change happened under (`None` = root).
    #[must_use]
    pub const fn parent(self) -> Option<NodeHandle> {
        match self {
            Self::BeginInsert { parent, .. }
            | Self::EndInsert { parent, .. }
            | Self::BeginRemove { parent, .. }
            | Self::EndRemove { parent, .. } => parent,
        }
    }

    /// Whether this is the opening half of a pair.
    #[must_use]
    pub const fn is_begin(self) -> bool {
        matches!(self, Self::BeginInsert { .. } | Self::BeginRemove { .. })
    }

    /// Whether this is part of an insertion pair.
    #[must_use]
    pub const fn is_insert(self) -> bool {
        matches!(self, Self::BeginInsert { .. } | Self::EndInsert { .. })
    }
}

/// Observer that appends every notification to a shared log.
///
/// Clones share the log, so one clone can be subscribed while another is
/// kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct ChangeRecorder {
    log: Arc<Mutex<Vec<StructuralChange>>>,
}

impl ChangeRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn changes(&self) -> Vec<StructuralChange> {
        self.log.lock().clone()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<StructuralChange> {
        std::mem::take(&mut *self.log.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    fn push(&self, change: StructuralChange) {
        self.log.lock().push(change);
    }
}

impl TreeObserver for ChangeRecorder {
    fn rows_about_to_be_inserted(
        &mut self,
        _tree: &TreeIndex,
        parent: Option<&Position>,
        first: usize,
        last: usize,
    ) {
        self.push(StructuralChange::BeginInsert {
            parent: parent.map(|p| p.node()),
            first,
            last,
        });
    }

    fn rows_inserted(
        &mut self,
        _tree: &TreeIndex,
        parent: Option<&Position>,
        first: usize,
        last: usize,
    ) {
        self.push(StructuralChange::EndInsert {
            parent: parent.map(|p| p.node()),
            first,
            last,
        });
    }

    fn rows_about_to_be_removed(
        &mut self,
        _tree: &TreeIndex,
        parent: Option<&Position>,
        first: usize,
        last: usize,
    ) {
        self.push(StructuralChange::BeginRemove {
            parent: parent.map(|p| p.node()),
            first,
            last,
        });
    }

    fn rows_removed(
        &mut self,
        _tree: &TreeIndex,
        parent: Option<&Position>,
        first: usize,
        last: usize,
    ) {
        self.push(StructuralChange::EndRemove {
            parent: parent.map(|p| p.node()),
            first,
            last,
        });
    }
}
