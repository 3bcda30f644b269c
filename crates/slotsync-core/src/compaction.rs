//! Left-compaction of slot-indexed columns
//!
//! The ledger and the identity index both run [`compact`] with the same
//! [`Removal`], which is what keeps slot `i` pointing at the same participant
//! in every column after slots are vacated.

use crate::{Error, Result};

/// The set of slots vacated by one tick
///
/// Built against the slot count *before* the tick. Duplicate slots collapse;
/// order on the wire is irrelevant.
#[derive(Debug, Clone)]
pub struct Removal {
    mask: Vec<bool>,
    count: usize,
}

impl Removal {
    /// Validate `slots` against `slot_count` and build the removal set
    pub fn new(slot_count: usize, slots: &[u32]) -> Result<Self> {
        let mut mask = vec![false; slot_count];
        let mut count = 0;
        for &slot in slots {
            let slot = slot as usize;
            let flag = mask.get_mut(slot).ok_or(Error::SlotOutOfRange {
                slot,
                count: slot_count,
            })?;
            if !*flag {
                *flag = true;
                count += 1;
            }
        }
        Ok(Self { mask, count })
    }

    /// A removal that vacates nothing
    pub fn none(slot_count: usize) -> Self {
        Self {
            mask: vec![false; slot_count],
            count: 0,
        }
    }

    /// Whether `slot` is vacated
    pub fn contains(&self, slot: usize) -> bool {
        self.mask.get(slot).copied().unwrap_or(false)
    }

    /// Number of distinct vacated slots
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if nothing is vacated
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Slot count the removal was built against
    pub fn slot_count(&self) -> usize {
        self.mask.len()
    }

    /// Number of slots that survive the removal
    pub fn retained(&self) -> usize {
        self.mask.len() - self.count
    }

    /// Vacated slots in ascending order
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(slot, &removed)| removed.then_some(slot))
    }
}

/// Compact `items` in place, dropping every slot in `removal`
///
/// Retained entries keep their relative order and move to the front; the
/// vacated tail is overwritten with `fill()`. Runs in a single pass. Returns
/// the number of retained entries.
pub fn compact<T>(items: &mut [T], removal: &Removal, mut fill: impl FnMut() -> T) -> usize {
    debug_assert_eq!(items.len(), removal.slot_count());

    let mut write = 0;
    for read in 0..items.len() {
        if removal.contains(read) {
            continue;
        }
        if write != read {
            items.swap(write, read);
        }
        write += 1;
    }
    for item in &mut items[write..] {
        *item = fill();
    }
    write
}
