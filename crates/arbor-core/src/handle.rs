//! Opaque node identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of one live object in the source graph.
///
/// A handle is address-equivalent: two handles are the same node iff they
/// refer to the same live object. The engine never dereferences a handle; it
/// only compares, hashes and prints it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHandle(u64);

impl NodeHandle {
    /// Wrap a raw address-like value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value this handle was built from.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::NodeHandle;

    #[test]
    fn displays_as_hex_address() {
        assert_eq!(NodeHandle::from_raw(0x1f40).to_string(), "0x1f40");
    }

    #[test]
    fn identity_is_the_raw_value() {
        let a = NodeHandle::from_raw(42);
        assert_eq!(a, NodeHandle::from_raw(42));
        assert_ne!(a, NodeHandle::from_raw(43));
        assert_eq!(a.as_raw(), 42);
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&NodeHandle::from_raw(7)).expect("serialize");
        assert_eq!(json, "7");
    }
}
