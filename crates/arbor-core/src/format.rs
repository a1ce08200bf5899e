//! Pluggable display capability and the degraded-read result type.

use serde::{Deserialize, Serialize};

use crate::handle::NodeHandle;

/// Turns a live node into display text.
///
/// Only ever called for nodes that passed the liveness re-check under the
/// shared object lock, so implementations may inspect the underlying object.
pub trait NodeFormatter: Send + Sync {
    /// Number of columns this formatter produces.
    fn column_count(&self) -> usize;

    /// Text for `column` of a live `node`, or `None` for an empty cell.
    fn format(&self, node: NodeHandle, column: usize) -> Option<String>;
}

/// Single-column formatter that shows the node address.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressFormatter;

impl NodeFormatter for AddressFormatter {
    fn column_count(&self) -> usize {
        1
    }

    fn format(&self, node: NodeHandle, column: usize) -> Option<String> {
        (column == 0).then(|| node.to_string())
    }
}

/// Result of a display read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum NodeData {
    /// The node is live; text comes from the formatter.
    Live(String),
    /// Still indexed but no longer live. Column 0 carries the address,
    /// every other column the deleted placeholder.
    Dangling(String),
    /// Live node, but the formatter has nothing for this column.
    Empty,
}

impl NodeData {
    /// Text to show, whatever the state.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Live(text) | Self::Dangling(text) => text,
            Self::Empty => "",
        }
    }

    #[must_use]
    pub const fn is_dangling(&self) -> bool {
        matches!(self, Self::Dangling(_))
    }
}

/// Degraded cell for an indexed node that failed the liveness check.
pub(crate) fn dangling(node: NodeHandle, column: usize, placeholder: &str) -> NodeData {
    if column == 0 {
        NodeData::Dangling(node.to_string())
    } else {
        NodeData::Dangling(placeholder.to_string())
    }
}
