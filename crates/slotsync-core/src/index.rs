//! Stable-identity index
//!
//! Maps the server's reusable slots to client-local [`StableId`]s. The dense
//! slot array and the id-to-slot map are kept separately and re-derived
//! together after every compaction.

use crate::compaction::{compact, Removal};
use crate::{Error, Result, StableId};
use std::collections::HashMap;

/// Identities that left and joined in one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityDelta {
    /// Ids whose slots were vacated, in ascending former-slot order
    pub removed: Vec<StableId>,
    /// Freshly minted ids, in ascending slot order
    pub added: Vec<StableId>,
}

/// Slot to stable id mapping with its own id counter
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    ids: Vec<StableId>,
    slots: HashMap<StableId, usize>,
    next: StableId,
}

impl Default for IdentityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityIndex {
    /// Create an empty index whose counter starts at [`StableId::BASE`]
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            slots: HashMap::new(),
            next: StableId::BASE,
        }
    }

    /// Number of occupied slots
    pub fn slot_count(&self) -> usize {
        self.ids.len()
    }

    /// Ids in slot order
    pub fn ids(&self) -> &[StableId] {
        &self.ids
    }

    /// Id occupying `slot`
    pub fn id_at(&self, slot: usize) -> Option<StableId> {
        self.ids.get(slot).copied()
    }

    /// Slot currently held by `id`
    pub fn slot_of(&self, id: StableId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    /// The id the next newly occupied slot will receive
    pub fn next_id(&self) -> StableId {
        self.next
    }

    /// Assign `indices_count` fresh ids in ascending slot order
    pub fn on_checkout(&mut self, indices_count: usize) -> Vec<StableId> {
        self.ids.clear();
        self.slots.clear();
        self.grow(indices_count)
    }

    /// Vacate `removed` slots, compact, then mint ids up to `indices_count`
    pub fn on_tick(&mut self, indices_count: usize, removed: &[u32]) -> Result<IdentityDelta> {
        let removal = Removal::new(self.ids.len(), removed)?;
        if indices_count < removal.retained() {
            return Err(Error::SlotCountUnderflow {
                declared: indices_count,
                retained: removal.retained(),
            });
        }
        Ok(self.apply_removal(indices_count, &removal))
    }

    pub(crate) fn apply_removal(&mut self, indices_count: usize, removal: &Removal) -> IdentityDelta {
        let removed: Vec<StableId> = removal.slots().map(|slot| self.ids[slot]).collect();
        for id in &removed {
            self.slots.remove(id);
        }

        let retained = compact(&mut self.ids, removal, || StableId(0));
        self.ids.truncate(retained);
        for (slot, id) in self.ids.iter().enumerate() {
            self.slots.insert(*id, slot);
        }

        let added = self.grow(indices_count);
        IdentityDelta { removed, added }
    }

    fn grow(&mut self, indices_count: usize) -> Vec<StableId> {
        let mut added = Vec::with_capacity(indices_count.saturating_sub(self.ids.len()));
        while self.ids.len() < indices_count {
            let id = self.next;
            self.next = id.next();
            self.slots.insert(id, self.ids.len());
            self.ids.push(id);
            added.push(id);
        }
        added
    }

    /// Clear all mappings and restart the counter at [`StableId::BASE`]
    pub fn reset(&mut self) {
        self.ids.clear();
        self.slots.clear();
        self.next = StableId::BASE;
    }
}
