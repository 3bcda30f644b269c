//! Frame codec: one bincode-encoded record per binary frame

use crate::bandwidth::Footprint;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slotsync_core::ServerMessage;

/// WebSocket sub-protocol token negotiated on connect
pub const SUBPROTOCOL: &str = "slotsync.v1";

/// Encode a record into a frame
pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(record)?)
}

/// Decode a frame into a record
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(frame)?)
}

/// Split a received frame's size into its component and state portions
pub fn footprint(message: &ServerMessage, frame_len: usize) -> Footprint {
    let (components, states) = match message {
        ServerMessage::InitialCheckout(checkout) => (
            encoded_size(&checkout.components),
            encoded_size(&checkout.states),
        ),
        ServerMessage::Tick(tick) => (
            encoded_size(&tick.component_delta_deltas),
            encoded_size(&tick.states),
        ),
        _ => (0, 0),
    };
    Footprint {
        total: frame_len as u64,
        components,
        states,
    }
}

fn encoded_size<T: Serialize + ?Sized>(value: &T) -> u64 {
    bincode::serialized_size(value).unwrap_or(0)
}
