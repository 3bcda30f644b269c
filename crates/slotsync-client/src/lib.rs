//! Slotsync Client - Reconnecting session that keeps a [`Mirror`] current
//!
//! This crate wraps [`slotsync_core`] with everything needed to talk to a live
//! server:
//!
//! - **Session**: connect, reconnect with jittered backoff, stop
//! - **Adapter**: handshake, ping replies, state writes queued until the
//!   server assigns this client's slot
//! - **Codec**: one bincode record per binary WebSocket frame
//! - **Bandwidth**: bytes received over the last second
//!
//! # Architecture
//!
//! ```text
//! SessionHandle --commands--> Session --frames--> Link (WebSocket)
//!       ^                        |
//!       |                        v
//!   RwLock<Mirror> <------- Adapter
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use slotsync_client::{ClientConfig, Session, SessionEvent, WsConnector};
//!
//! let config = ClientConfig::load("client.ron")?;
//! let (session, handle, mut events) = Session::new(config, WsConnector::new())?;
//! tokio::spawn(session.run());
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Tick { added, removed, .. } = event {
//!         println!("+{} -{}", added.len(), removed.len());
//!     }
//! }
//! ```

mod adapter;
mod backoff;
mod bandwidth;
pub mod codec;
mod config;
mod error;
mod pending;
mod session;
mod transport;

pub use adapter::{Adapter, AdapterEvent};
pub use backoff::Backoff;
pub use bandwidth::{BandwidthMeter, BandwidthSample, Footprint};
pub use config::{BackoffConfig, ClientConfig};
pub use error::{Error, Result};
pub use pending::PendingStates;
pub use session::{Session, SessionEvent, SessionHandle, SessionState};
pub use transport::{Connector, Link, WsConnector, WsLink};

// Re-export the mirror types callers read from
pub use slotsync_core::{ComponentId, Mirror, MirrorSnapshot, StableId, StateId, StateValue};
