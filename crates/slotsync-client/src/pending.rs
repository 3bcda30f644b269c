//! State writes held back until the server assigns this client's slot

use indexmap::IndexMap;
use slotsync_core::{StateId, StateValue};

/// Queue of state writes awaiting the user index
///
/// Holds at most one entry per state: a later write replaces an earlier one
/// but keeps its original queue position.
#[derive(Debug, Clone, Default)]
pub struct PendingStates {
    states: IndexMap<StateId, StateValue>,
}

impl PendingStates {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write, replacing any earlier write to the same state
    pub fn push(&mut self, state_id: StateId, value: StateValue) {
        self.states.insert(state_id, value);
    }

    /// Take every queued write, oldest first
    pub fn drain(&mut self) -> Vec<(StateId, StateValue)> {
        self.states.drain(..).collect()
    }

    /// Get the number of queued states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
