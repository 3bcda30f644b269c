//! Error types for slotsync-core
//!
//! Every variant describes a message that disagrees with the local mirror,
//! which points at a codec or version mismatch with the server. None of them
//! are corrected locally.

use crate::{ComponentId, StateId};
use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{component}: expected {expected} entries in {field}, got {got}")]
    ComponentLengthMismatch {
        component: ComponentId,
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{state}: expected {expected} entries, got {got}")]
    StateLengthMismatch {
        state: StateId,
        expected: usize,
        got: usize,
    },

    #[error("Slot {slot} out of range for {count} occupied slots")]
    SlotOutOfRange { slot: usize, count: usize },

    #[error("Declared slot count {declared} is below the {retained} slots left after removal")]
    SlotCountUnderflow { declared: usize, retained: usize },

    #[error("Declared slot count {declared} exceeds the limit of {max}")]
    SlotCountTooLarge { declared: usize, max: usize },

    #[error("Initial checkout received twice without a reset")]
    AlreadyCheckedOut,

    #[error("Tick received before the initial checkout")]
    NotCheckedOut,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
