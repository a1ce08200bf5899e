use std::fmt;

/// Machine-readable error codes shared by every arbor crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    UnknownNode,
    UnknownParent,
    CycleRejected,
    IndexMissingChild,
    IndexMissingParent,
    DuplicateChild,
    OrphanedChildren,
    UnreachableNode,
    InvalidSimulationConfig,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::UnknownNode => "E2001",
            Self::UnknownParent => "E2002",
            Self::CycleRejected => "E2003",
            Self::IndexMissingChild => "E3001",
            Self::IndexMissingParent => "E3002",
            Self::DuplicateChild => "E3003",
            Self::OrphanedChildren => "E3004",
            Self::UnreachableNode => "E3005",
            Self::InvalidSimulationConfig => "E4001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::UnknownNode => "Node is not live in the object graph",
            Self::UnknownParent => "Parent is not live in the object graph",
            Self::CycleRejected => "Reparent would create a cycle",
            Self::IndexMissingChild => "Child index entry has no matching children entry",
            Self::IndexMissingParent => "Children entry has no matching parent entry",
            Self::DuplicateChild => "Node appears more than once in the children index",
            Self::OrphanedChildren => "Children recorded under an unindexed node",
            Self::UnreachableNode => "Indexed node is not reachable from the root",
            Self::InvalidSimulationConfig => "Invalid simulation configuration",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .arbor/config.toml and retry."),
            Self::UnknownNode | Self::UnknownParent => {
                Some("The object may have been destroyed concurrently; re-query the graph.")
            }
            Self::CycleRejected => Some("Pick a parent outside the node's own subtree."),
            Self::IndexMissingChild
            | Self::IndexMissingParent
            | Self::DuplicateChild
            | Self::OrphanedChildren
            | Self::UnreachableNode => {
                Some("Projection indexes diverged; report a bug with the event trace.")
            }
            Self::InvalidSimulationConfig => Some("Check seed range, node budget and rounds."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
