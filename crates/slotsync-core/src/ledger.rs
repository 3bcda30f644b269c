//! Component delta ledger
//!
//! Holds every component as three parallel slot-indexed columns (`value`,
//! `delta`, `delta_delta`) and every state as a slot-indexed column of
//! optional byte buffers. A tick runs, in order:
//!
//! 1. compaction of every column by the tick's [`Removal`]
//! 2. resize of every column to the tick's slot count
//! 3. integration: `delta[i] += dd[i]; value[i] += delta[i]`
//! 4. state overwrites
//!
//! Validation happens before step 1, so a rejected tick leaves the ledger
//! untouched.

use crate::compaction::{compact, Removal};
use crate::protocol::{InitialCheckout, StateValue, Tick};
use crate::{ComponentId, Error, Result, StateId};
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One numeric component across all slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentColumn {
    value: Vec<i64>,
    delta: Vec<i64>,
    delta_delta: Vec<i64>,
}

impl ComponentColumn {
    /// Column taken verbatim from a checkout; the second-order term starts at zero
    pub fn from_snapshot(values: Vec<i64>, deltas: Vec<i64>) -> Self {
        let delta_delta = vec![0; values.len()];
        Self {
            value: values,
            delta: deltas,
            delta_delta,
        }
    }

    /// Column first observed in a tick: the delta-deltas seed all three terms
    pub fn seeded(delta_deltas: &[i64]) -> Self {
        Self {
            value: delta_deltas.to_vec(),
            delta: delta_deltas.to_vec(),
            delta_delta: delta_deltas.to_vec(),
        }
    }

    /// Current absolute values
    pub fn values(&self) -> &[i64] {
        &self.value
    }

    /// Current first-order steps
    pub fn deltas(&self) -> &[i64] {
        &self.delta
    }

    /// Second-order increments applied by the last tick
    pub fn delta_deltas(&self) -> &[i64] {
        &self.delta_delta
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Check if the column holds no slots
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    fn compact(&mut self, removal: &Removal) {
        compact(&mut self.value, removal, || 0);
        compact(&mut self.delta, removal, || 0);
        compact(&mut self.delta_delta, removal, || 0);
    }

    fn resize(&mut self, slot_count: usize) {
        self.value.resize(slot_count, 0);
        self.delta.resize(slot_count, 0);
        self.delta_delta.resize(slot_count, 0);
    }

    fn integrate(&mut self, delta_deltas: &[i64]) {
        for (i, &dd) in delta_deltas.iter().enumerate() {
            self.delta_delta[i] = dd;
            self.delta[i] = self.delta[i].wrapping_add(dd);
            self.value[i] = self.value[i].wrapping_add(self.delta[i]);
        }
    }
}

/// One opaque state across all slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateColumn {
    values: Vec<StateValue>,
}

impl StateColumn {
    fn empty(slot_count: usize) -> Self {
        Self {
            values: vec![None; slot_count],
        }
    }

    /// Entries per slot
    pub fn values(&self) -> &[StateValue] {
        &self.values
    }

    /// Entry at `slot`, `None` if unset or cleared
    pub fn get(&self, slot: usize) -> Option<&[u8]> {
        self.values.get(slot).and_then(|v| v.as_deref())
    }

    fn compact(&mut self, removal: &Removal) {
        compact(&mut self.values, removal, || None);
    }

    fn resize(&mut self, slot_count: usize) {
        self.values.resize(slot_count, None);
    }
}

/// A state overwrite applied by a tick, addressed by slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStateChange {
    pub slot: usize,
    pub state_id: StateId,
    pub value: StateValue,
}

/// Columnar store of every component and state
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    slot_count: usize,
    components: IndexMap<ComponentId, ComponentColumn>,
    states: IndexMap<StateId, StateColumn>,
    checked_out: bool,
}

impl Ledger {
    /// Largest slot count a checkout or tick may declare
    pub const MAX_SLOTS: usize = 1 << 20;

    /// Create an empty ledger awaiting its checkout
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of slots
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Whether a checkout has been applied since construction or the last reset
    pub fn is_checked_out(&self) -> bool {
        self.checked_out
    }

    /// Get a component column
    pub fn component(&self, id: ComponentId) -> Option<&ComponentColumn> {
        self.components.get(&id)
    }

    /// Iterate component columns in first-seen order
    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &ComponentColumn)> {
        self.components.iter().map(|(id, c)| (*id, c))
    }

    /// Get a state column
    pub fn state(&self, id: StateId) -> Option<&StateColumn> {
        self.states.get(&id)
    }

    /// Iterate state columns in first-seen order
    pub fn states(&self) -> impl Iterator<Item = (StateId, &StateColumn)> {
        self.states.iter().map(|(id, s)| (*id, s))
    }

    /// Value of `component` at `slot`
    pub fn value(&self, slot: usize, component: ComponentId) -> Option<i64> {
        self.components
            .get(&component)
            .and_then(|c| c.value.get(slot).copied())
    }

    /// Load the full snapshot; returns the slot count to assign identities for
    ///
    /// Values and deltas are taken verbatim, no integration step runs.
    pub fn apply_initial_checkout(&mut self, checkout: &InitialCheckout) -> Result<usize> {
        if self.checked_out {
            return Err(Error::AlreadyCheckedOut);
        }
        let count = checked_count(checkout.indices_count)?;

        for component in &checkout.components {
            for (field, len) in [
                ("values", component.values.len()),
                ("deltas", component.deltas.len()),
            ] {
                if len != count {
                    return Err(Error::ComponentLengthMismatch {
                        component: component.component_id,
                        field,
                        expected: count,
                        got: len,
                    });
                }
            }
        }
        for state in &checkout.states {
            if state.values.len() != count {
                return Err(Error::StateLengthMismatch {
                    state: state.state_id,
                    expected: count,
                    got: state.values.len(),
                });
            }
        }

        self.components = checkout
            .components
            .iter()
            .map(|c| {
                (
                    c.component_id,
                    ComponentColumn::from_snapshot(c.values.clone(), c.deltas.clone()),
                )
            })
            .collect();
        self.states = checkout
            .states
            .iter()
            .map(|s| {
                (
                    s.state_id,
                    StateColumn {
                        values: s.values.clone(),
                    },
                )
            })
            .collect();
        self.slot_count = count;
        self.checked_out = true;

        Ok(count)
    }

    /// Check a tick against the current ledger and build its removal set
    pub fn validate_tick(&self, tick: &Tick) -> Result<Removal> {
        if !self.checked_out {
            return Err(Error::NotCheckedOut);
        }
        let count = checked_count(tick.indices_count)?;
        let removal = Removal::new(self.slot_count, &tick.removed_indices)?;
        if count < removal.retained() {
            return Err(Error::SlotCountUnderflow {
                declared: count,
                retained: removal.retained(),
            });
        }

        for entry in &tick.component_delta_deltas {
            if entry.delta_deltas.len() != count {
                return Err(Error::ComponentLengthMismatch {
                    component: entry.component_id,
                    field: "delta_deltas",
                    expected: count,
                    got: entry.delta_deltas.len(),
                });
            }
        }
        for entry in &tick.states {
            if let Some(&(slot, _)) = entry
                .updated_states
                .iter()
                .find(|(slot, _)| *slot as usize >= count)
            {
                return Err(Error::SlotOutOfRange {
                    slot: slot as usize,
                    count,
                });
            }
        }

        Ok(removal)
    }

    /// Validate and apply a tick
    ///
    /// Returns the state overwrites in the order they appear in the tick.
    pub fn apply_tick(&mut self, tick: &Tick) -> Result<Vec<SlotStateChange>> {
        let removal = self.validate_tick(tick)?;
        Ok(self.apply_validated(tick, &removal))
    }

    pub(crate) fn apply_validated(&mut self, tick: &Tick, removal: &Removal) -> Vec<SlotStateChange> {
        let count = tick.indices_count as usize;

        for column in self.components.values_mut() {
            column.compact(removal);
            column.resize(count);
        }
        for column in self.states.values_mut() {
            column.compact(removal);
            column.resize(count);
        }
        self.slot_count = count;

        for entry in &tick.component_delta_deltas {
            match self.components.entry(entry.component_id) {
                Entry::Occupied(column) => column.into_mut().integrate(&entry.delta_deltas),
                Entry::Vacant(slot) => {
                    slot.insert(ComponentColumn::seeded(&entry.delta_deltas));
                }
            }
        }

        let mut changes = Vec::new();
        for entry in &tick.states {
            let column = self
                .states
                .entry(entry.state_id)
                .or_insert_with(|| StateColumn::empty(count));
            for (slot, value) in &entry.updated_states {
                let slot = *slot as usize;
                column.values[slot] = value.clone();
                changes.push(SlotStateChange {
                    slot,
                    state_id: entry.state_id,
                    value: value.clone(),
                });
            }
        }
        changes
    }

    /// Drop everything and wait for a fresh checkout
    pub fn reset(&mut self) {
        self.slot_count = 0;
        self.components.clear();
        self.states.clear();
        self.checked_out = false;
    }
}

fn checked_count(indices_count: u32) -> Result<usize> {
    let count = indices_count as usize;
    if count > Ledger::MAX_SLOTS {
        return Err(Error::SlotCountTooLarge {
            declared: count,
            max: Ledger::MAX_SLOTS,
        });
    }
    Ok(count)
}
