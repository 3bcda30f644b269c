//! Slotsync Core - Columnar delta mirror of a server-authoritative slot table
//!
//! The server owns a table of *slots*. Each slot carries numeric components
//! (synchronized as absolute value plus first and second order deltas) and
//! opaque state blobs. Slots are reused as participants come and go, so this
//! crate pairs the columnar data with a client-local identity layer:
//!
//! - [`Ledger`] - parallel `value` / `delta` / `delta_delta` columns per component
//!   and optional byte buffers per state
//! - [`IdentityIndex`] - slot to [`StableId`] mapping that survives compaction
//! - [`ParticipantViews`] - per-id read records for O(1) lookup
//! - [`Mirror`] - applies checkouts and ticks to all three in lock-step
//!
//! ## Identity
//!
//! A [`StableId`] is assigned the first time a slot is seen occupied and never
//! handed to another occupant. After [`Mirror::reset`] the counter restarts at
//! [`StableId::BASE`], so the same occupancy pattern yields the same ids. Ids
//! are a client-local convenience, not a global identity.
//!
//! ## Example
//!
//! ```
//! use slotsync_core::{ComponentId, ComponentSnapshot, InitialCheckout, Mirror, StableId};
//!
//! let mut mirror = Mirror::new();
//! mirror
//!     .apply_checkout(&InitialCheckout {
//!         indices_count: 2,
//!         components: vec![ComponentSnapshot {
//!             component_id: ComponentId(1),
//!             values: vec![100, 200],
//!             deltas: vec![0, 0],
//!         }],
//!         states: vec![],
//!     })
//!     .unwrap();
//!
//! assert_eq!(mirror.component(StableId::BASE, ComponentId(1)), Some(100));
//! ```

mod compaction;
mod error;
mod identity;
mod index;
mod ledger;
mod mirror;
pub mod protocol;
mod view;

pub use compaction::{compact, Removal};
pub use error::{Error, Result};
pub use identity::{ComponentId, StableId, StateId};
pub use index::{IdentityDelta, IdentityIndex};
pub use ledger::{ComponentColumn, Ledger, SlotStateChange, StateColumn};
pub use mirror::{CheckoutOutcome, Mirror, MirrorSnapshot, StateUpdate, TickOutcome};
pub use protocol::{
    ClientMessage, ComponentDeltaDeltas, ComponentSnapshot, InitialCheckout, ServerMessage,
    StateSnapshot, StateUpdates, StateValue, Tick,
};
pub use view::{ParticipantView, ParticipantViews};
