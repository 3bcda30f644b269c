//! Typed wire records exchanged with the server
//!
//! These are the decoded forms of the binary frames. The client crate owns the
//! framing; this module only fixes the shape of each record.

use crate::{ComponentId, StateId};
use serde::{Deserialize, Serialize};

/// Opaque state payload; `None` is the explicit "cleared" marker
pub type StateValue = Option<Vec<u8>>;

/// Full snapshot of one component column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub component_id: ComponentId,
    /// Absolute values, one per slot
    pub values: Vec<i64>,
    /// First-order steps, one per slot
    pub deltas: Vec<i64>,
}

/// Full snapshot of one state column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state_id: StateId,
    /// One entry per slot
    pub values: Vec<StateValue>,
}

/// The first application message of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialCheckout {
    pub indices_count: u32,
    pub components: Vec<ComponentSnapshot>,
    pub states: Vec<StateSnapshot>,
}

/// Second-order increments for one component, one per slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDeltaDeltas {
    pub component_id: ComponentId,
    pub delta_deltas: Vec<i64>,
}

/// Sparse per-slot overwrites for one state column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdates {
    pub state_id: StateId,
    pub updated_states: Vec<(u32, StateValue)>,
}

/// Incremental update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Slot count after this tick
    pub indices_count: u32,
    /// Slots vacated by this tick, relative to the previous slot count
    pub removed_indices: Vec<u32>,
    pub component_delta_deltas: Vec<ComponentDeltaDeltas>,
    pub states: Vec<StateUpdates>,
    /// Server clock in milliseconds since the Unix epoch
    pub server_time: i64,
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Error {
        error_type: String,
        message: String,
        retryable: bool,
    },
    Warning {
        message: String,
    },
    InitialCheckout(InitialCheckout),
    Tick(Tick),
    /// The slot owned by this client
    UserIndex {
        index: u32,
    },
    Ping {
        nonce: u64,
    },
    ServerCustom {
        custom_type: u32,
        contents: Vec<u8>,
    },
}

impl ServerMessage {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Error { .. } => "error",
            ServerMessage::Warning { .. } => "warning",
            ServerMessage::InitialCheckout(_) => "initial_checkout",
            ServerMessage::Tick(_) => "tick",
            ServerMessage::UserIndex { .. } => "user_index",
            ServerMessage::Ping { .. } => "ping",
            ServerMessage::ServerCustom { .. } => "server_custom",
        }
    }
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    ConnectUser {
        token: String,
        observer: bool,
        components: Vec<(ComponentId, i64)>,
        states: Vec<(StateId, StateValue)>,
    },
    SetUserComponents {
        components: Vec<(ComponentId, i64)>,
        states: Vec<(StateId, StateValue)>,
    },
    Pong {
        nonce: u64,
    },
    ClientCustom {
        custom_type: u32,
        contents: Vec<u8>,
    },
}
