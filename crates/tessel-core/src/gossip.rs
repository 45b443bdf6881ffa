// crates/tessel-core/src/gossip.rs
//
// Events carried by the membership/gossip bus.

use serde::{Deserialize, Serialize};

/// A gossip message delivered to registered event handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipEvent {
    /// A serialized Bloom hint describing which keys `peer_hash` holds.
    Bloom {
        /// Host of the node that emitted the event.
        sender: String,
        /// Hash of the host whose hint this is.
        peer_hash: u32,
        /// Hint bytes in the fixed little-endian layout.
        payload: Vec<u8>,
    },
}

impl GossipEvent {
    pub fn sender(&self) -> &str {
        match self {
            GossipEvent::Bloom { sender, .. } => sender,
        }
    }
}
