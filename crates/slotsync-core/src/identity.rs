//! Identity types for participants, components and states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-local identifier for a continuously occupied slot
///
/// Assigned the first time a slot becomes occupied and kept for as long as the
/// occupant stays. Identifiers are only meaningful within one client: two
/// clients observing the same server can hand out different ids for the same
/// participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StableId(pub u64);

impl StableId {
    /// First identifier handed out after construction or `reset`
    pub const BASE: StableId = StableId(1);

    /// Create a new stable ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant:{}", self.0)
    }
}

/// Key of a numeric component column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub u32);

impl ComponentId {
    /// Create a new component ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component:{}", self.0)
    }
}

impl From<u32> for ComponentId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Key of an opaque state column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub u32);

impl StateId {
    /// Create a new state ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state:{}", self.0)
    }
}

impl From<u32> for StateId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_id() {
        let id = StableId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.next(), StableId(43));
        assert_eq!(format!("{}", id), "participant:42");
    }

    #[test]
    fn test_column_ids() {
        assert_eq!(ComponentId::from(7).raw(), 7);
        assert_eq!(format!("{}", StateId::new(3)), "state:3");
    }
}
