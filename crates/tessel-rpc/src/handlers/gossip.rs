// crates/tessel-rpc/src/handlers/gossip.rs
//
// Gossip delivery: `gossip/event` hands a peer's event to this node's
// registered handler.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tessel_core::{EventHandler, GossipEvent};

use super::HandlerError;

/// Response to a delivered gossip event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipAck {
    /// False when this node has no handler to deliver to.
    pub accepted: bool,
}

pub async fn handle_gossip_event(
    handler: Option<&Arc<dyn EventHandler>>,
    event: GossipEvent,
) -> Result<GossipAck, HandlerError> {
    let Some(handler) = handler else {
        tracing::debug!("Dropping gossip event from {}: no handler", event.sender());
        return Ok(GossipAck { accepted: false });
    };
    handler.handle_event(event).await;
    Ok(GossipAck { accepted: true })
}
