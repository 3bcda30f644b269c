//! Per-participant read views keyed by stable id

use crate::protocol::StateValue;
use crate::{ComponentId, StableId, StateId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Everything known about one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: StableId,
    /// Slot the participant currently occupies
    pub slot: usize,
    pub components: IndexMap<ComponentId, i64>,
    pub states: IndexMap<StateId, StateValue>,
}

impl ParticipantView {
    /// Create an empty view at `slot`
    pub fn new(id: StableId, slot: usize) -> Self {
        Self {
            id,
            slot,
            components: IndexMap::new(),
            states: IndexMap::new(),
        }
    }

    /// Current value of a component
    pub fn component(&self, id: ComponentId) -> Option<i64> {
        self.components.get(&id).copied()
    }

    /// Current payload of a state, `None` if unset or cleared
    pub fn state(&self, id: StateId) -> Option<&[u8]> {
        self.states.get(&id).and_then(|v| v.as_deref())
    }
}

/// Views for every occupied slot, in join order
#[derive(Debug, Clone, Default)]
pub struct ParticipantViews {
    views: IndexMap<StableId, ParticipantView>,
}

impl ParticipantViews {
    /// Create an empty set of views
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a participant's view
    pub fn get(&self, id: StableId) -> Option<&ParticipantView> {
        self.views.get(&id)
    }

    /// Iterate views in join order
    pub fn iter(&self) -> impl Iterator<Item = &ParticipantView> {
        self.views.values()
    }

    /// Number of views
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Check if there are no views
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub(crate) fn insert(&mut self, view: ParticipantView) {
        self.views.insert(view.id, view);
    }

    pub(crate) fn remove(&mut self, id: StableId) -> Option<ParticipantView> {
        self.views.shift_remove(&id)
    }

    pub(crate) fn get_mut(&mut self, id: StableId) -> Option<&mut ParticipantView> {
        self.views.get_mut(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.views.clear();
    }
}
