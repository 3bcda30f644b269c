//! Handshake and queueing adapter
//!
//! Turns decoded server records into mirror operations and gates writes that
//! originate locally. The adapter does no IO: outgoing records collect in an
//! outbox that the session drains after every call.
//!
//! Local state writes pass through two gates:
//!
//! - **dedup**: a state whose bytes equal the last value sent for it is dropped
//! - **identity**: until the server reports this client's user index, state
//!   writes are queued and then flushed as one batched update
//!
//! Component values skip both gates and are always sent.

use crate::config::ClientConfig;
use crate::pending::PendingStates;
use crate::Result;
use slotsync_core::{
    CheckoutOutcome, ClientMessage, ComponentId, Mirror, ServerMessage, StateId, StateValue,
    TickOutcome,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Effect of one server record that the caller should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// The initial checkout was applied
    Connected(CheckoutOutcome),
    /// A tick was applied
    Tick {
        outcome: TickOutcome,
        server_time: i64,
    },
    /// The server assigned this client's slot
    UserIndex(u32),
    ServerError {
        error_type: String,
        message: String,
        retryable: bool,
    },
    Warning(String),
    ServerCustom {
        custom_type: u32,
        contents: Vec<u8>,
    },
}

#[derive(Debug)]
enum Identity {
    Awaiting(PendingStates),
    Identified(u32),
}

/// Per-connection protocol state
#[derive(Debug)]
pub struct Adapter {
    token: String,
    observer: bool,
    ignore_data: bool,
    announced: bool,
    identity: Identity,
    last_sent: HashMap<StateId, StateValue>,
    outbox: Vec<ClientMessage>,
}

impl Adapter {
    /// Create the adapter for a fresh connection
    ///
    /// Observers announce themselves immediately with empty payloads.
    pub fn new(config: &ClientConfig) -> Self {
        let mut adapter = Self {
            token: config.token.clone(),
            observer: config.observer,
            ignore_data: config.ignore_data,
            announced: false,
            identity: Identity::Awaiting(PendingStates::new()),
            last_sent: HashMap::new(),
            outbox: Vec::new(),
        };
        if adapter.observer {
            adapter.announce(Vec::new(), Vec::new());
        }
        adapter
    }

    /// Submit this client's components and changed states
    ///
    /// The first call announces the connection and carries the payload.
    pub fn set_user_components(
        &mut self,
        components: &[(ComponentId, i64)],
        states: &[(StateId, StateValue)],
    ) {
        if self.observer {
            warn!("observer clients own no slot, dropping local component update");
            return;
        }

        let changed = self.dedup(states);
        if !self.announced {
            self.announce(components.to_vec(), changed);
            return;
        }

        match &mut self.identity {
            Identity::Awaiting(pending) => {
                for (state_id, value) in changed {
                    pending.push(state_id, value);
                }
                debug!(queued = pending.len(), "user index not assigned yet, queueing states");
                if !components.is_empty() {
                    self.outbox.push(ClientMessage::SetUserComponents {
                        components: components.to_vec(),
                        states: Vec::new(),
                    });
                }
            }
            Identity::Identified(_) => {
                if components.is_empty() && changed.is_empty() {
                    return;
                }
                self.outbox.push(ClientMessage::SetUserComponents {
                    components: components.to_vec(),
                    states: changed,
                });
            }
        }
    }

    /// Queue an opaque custom record for the server
    pub fn send_custom_message(&mut self, custom_type: u32, contents: Vec<u8>) {
        self.outbox.push(ClientMessage::ClientCustom {
            custom_type,
            contents,
        });
    }

    /// React to one decoded server record
    ///
    /// Protocol errors from the mirror are returned and leave it unchanged.
    pub fn handle(
        &mut self,
        message: ServerMessage,
        mirror: &mut Mirror,
    ) -> Result<Option<AdapterEvent>> {
        let event = match message {
            ServerMessage::Error {
                error_type,
                message,
                retryable,
            } => Some(AdapterEvent::ServerError {
                error_type,
                message,
                retryable,
            }),
            ServerMessage::Warning { message } => Some(AdapterEvent::Warning(message)),
            ServerMessage::InitialCheckout(checkout) => {
                let outcome = if self.ignore_data {
                    CheckoutOutcome::default()
                } else {
                    mirror.apply_checkout(&checkout)?
                };
                debug!(
                    indices_count = checkout.indices_count,
                    components = checkout.components.len(),
                    states = checkout.states.len(),
                    "initial checkout applied"
                );
                Some(AdapterEvent::Connected(outcome))
            }
            ServerMessage::Tick(tick) => {
                let outcome = if self.ignore_data {
                    TickOutcome::default()
                } else {
                    mirror.apply_tick(&tick)?
                };
                Some(AdapterEvent::Tick {
                    outcome,
                    server_time: tick.server_time,
                })
            }
            ServerMessage::UserIndex { index } => {
                self.identify(index);
                Some(AdapterEvent::UserIndex(index))
            }
            ServerMessage::Ping { nonce } => {
                self.outbox.push(ClientMessage::Pong { nonce });
                None
            }
            ServerMessage::ServerCustom {
                custom_type,
                contents,
            } => Some(AdapterEvent::ServerCustom {
                custom_type,
                contents,
            }),
        };
        Ok(event)
    }

    /// Take every record waiting to be sent
    pub fn take_outbox(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// This client's slot, once assigned
    pub fn user_index(&self) -> Option<u32> {
        match self.identity {
            Identity::Identified(index) => Some(index),
            Identity::Awaiting(_) => None,
        }
    }

    /// Whether the connect announcement has been queued
    pub fn is_announced(&self) -> bool {
        self.announced
    }

    /// Number of state writes held until the user index arrives
    pub fn pending_states(&self) -> usize {
        match &self.identity {
            Identity::Awaiting(pending) => pending.len(),
            Identity::Identified(_) => 0,
        }
    }

    fn announce(&mut self, components: Vec<(ComponentId, i64)>, states: Vec<(StateId, StateValue)>) {
        self.announced = true;
        self.outbox.push(ClientMessage::ConnectUser {
            token: self.token.clone(),
            observer: self.observer,
            components,
            states,
        });
    }

    fn identify(&mut self, index: u32) {
        let previous = std::mem::replace(&mut self.identity, Identity::Identified(index));
        if let Identity::Awaiting(mut pending) = previous {
            if !pending.is_empty() {
                debug!(index, flushed = pending.len(), "flushing queued states");
                self.outbox.push(ClientMessage::SetUserComponents {
                    components: Vec::new(),
                    states: pending.drain(),
                });
            }
        }
    }

    fn dedup(&mut self, states: &[(StateId, StateValue)]) -> Vec<(StateId, StateValue)> {
        let mut changed = Vec::with_capacity(states.len());
        for (state_id, value) in states {
            if self.last_sent.get(state_id) == Some(value) {
                continue;
            }
            self.last_sent.insert(*state_id, value.clone());
            changed.push((*state_id, value.clone()));
        }
        changed
    }
}
