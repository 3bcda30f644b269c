//! Mirror - ledger, identity index and participant views kept in lock-step
//!
//! The mirror is the only writer of the three structures. Every tick is
//! validated once, then the ledger and the index are compacted with the same
//! [`Removal`](crate::Removal), so slot `i` names the same participant in both.

use crate::index::IdentityIndex;
use crate::ledger::Ledger;
use crate::protocol::{InitialCheckout, StateValue, Tick};
use crate::view::{ParticipantView, ParticipantViews};
use crate::{ComponentId, Result, StableId, StateId};
use serde::{Deserialize, Serialize};

/// Result of loading an initial checkout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutOutcome {
    /// Ids assigned to every slot, in slot order
    pub added: Vec<StableId>,
}

/// A state overwrite, addressed by participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub id: StableId,
    pub state_id: StateId,
    pub value: StateValue,
}

/// Result of applying a tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub removed: Vec<StableId>,
    pub added: Vec<StableId>,
    /// In the order the tick listed them, not slot order
    pub state_updates: Vec<StateUpdate>,
}

/// Serializable copy of the whole mirror, participants in slot order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    pub slot_count: usize,
    pub participants: Vec<ParticipantView>,
}

/// Client-side mirror of the server's slot table
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    ledger: Ledger,
    index: IdentityIndex,
    views: ParticipantViews,
}

impl Mirror {
    /// Create an empty mirror awaiting its checkout
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the initial checkout and assign an id to every slot
    pub fn apply_checkout(&mut self, checkout: &InitialCheckout) -> Result<CheckoutOutcome> {
        let count = self.ledger.apply_initial_checkout(checkout)?;
        let added = self.index.on_checkout(count);

        self.views.clear();
        for (slot, id) in added.iter().enumerate() {
            self.views.insert(build_view(&self.ledger, *id, slot));
        }

        Ok(CheckoutOutcome { added })
    }

    /// Apply one tick
    ///
    /// A tick that fails validation leaves the mirror unchanged.
    pub fn apply_tick(&mut self, tick: &Tick) -> Result<TickOutcome> {
        let removal = self.ledger.validate_tick(tick)?;
        let known_states = self.ledger.states().count();
        let changes = self.ledger.apply_validated(tick, &removal);
        let new_states: Vec<StateId> = self
            .ledger
            .states()
            .skip(known_states)
            .map(|(state_id, _)| state_id)
            .collect();
        let delta = self
            .index
            .apply_removal(tick.indices_count as usize, &removal);
        debug_assert_eq!(self.ledger.slot_count(), self.index.slot_count());

        for id in &delta.removed {
            self.views.remove(*id);
        }

        for (slot, &id) in self.index.ids().iter().enumerate() {
            match self.views.get_mut(id) {
                Some(view) => {
                    view.slot = slot;
                    for &state_id in &new_states {
                        view.states.entry(state_id).or_insert(None);
                    }
                    for entry in &tick.component_delta_deltas {
                        if let Some(value) = self.ledger.value(slot, entry.component_id) {
                            view.components.insert(entry.component_id, value);
                        }
                    }
                }
                None => self.views.insert(build_view(&self.ledger, id, slot)),
            }
        }

        let mut state_updates = Vec::with_capacity(changes.len());
        for change in changes {
            let Some(id) = self.index.id_at(change.slot) else {
                continue;
            };
            if let Some(view) = self.views.get_mut(id) {
                view.states.insert(change.state_id, change.value.clone());
            }
            state_updates.push(StateUpdate {
                id,
                state_id: change.state_id,
                value: change.value,
            });
        }

        Ok(TickOutcome {
            removed: delta.removed,
            added: delta.added,
            state_updates,
        })
    }

    /// Forget everything, including the id counter
    pub fn reset(&mut self) {
        self.ledger.reset();
        self.index.reset();
        self.views.clear();
    }

    /// Whether a checkout has been applied since the last reset
    pub fn is_checked_out(&self) -> bool {
        self.ledger.is_checked_out()
    }

    /// Current number of slots
    pub fn slot_count(&self) -> usize {
        self.ledger.slot_count()
    }

    /// Current value of a participant's component
    pub fn component(&self, id: StableId, component: ComponentId) -> Option<i64> {
        self.views.get(id).and_then(|v| v.component(component))
    }

    /// Current first-order step of a participant's component
    pub fn delta(&self, id: StableId, component: ComponentId) -> Option<i64> {
        let slot = self.index.slot_of(id)?;
        self.ledger
            .component(component)
            .and_then(|c| c.deltas().get(slot).copied())
    }

    /// Current payload of a participant's state
    pub fn state(&self, id: StableId, state: StateId) -> Option<&[u8]> {
        self.views.get(id).and_then(|v| v.state(state))
    }

    /// Get a participant's view
    pub fn participant(&self, id: StableId) -> Option<&ParticipantView> {
        self.views.get(id)
    }

    /// Iterate participants in join order
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantView> {
        self.views.iter()
    }

    /// Slot held by `id`
    pub fn slot_of(&self, id: StableId) -> Option<usize> {
        self.index.slot_of(id)
    }

    /// Id occupying `slot`
    pub fn id_at(&self, slot: usize) -> Option<StableId> {
        self.index.id_at(slot)
    }

    /// Ids in slot order
    pub fn ids(&self) -> &[StableId] {
        self.index.ids()
    }

    /// Read access to the columnar ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Copy the full mirror out, participants in slot order
    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            slot_count: self.slot_count(),
            participants: self
                .index
                .ids()
                .iter()
                .filter_map(|id| self.views.get(*id).cloned())
                .collect(),
        }
    }
}

fn build_view(ledger: &Ledger, id: StableId, slot: usize) -> ParticipantView {
    let mut view = ParticipantView::new(id, slot);
    for (component_id, column) in ledger.components() {
        if let Some(value) = column.values().get(slot) {
            view.components.insert(component_id, *value);
        }
    }
    for (state_id, column) in ledger.states() {
        if let Some(value) = column.values().get(slot) {
            view.states.insert(state_id, value.clone());
        }
    }
    view
}
