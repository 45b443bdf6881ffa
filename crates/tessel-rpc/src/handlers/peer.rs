// crates/tessel-rpc/src/handlers/peer.rs
//
// Peer announcement: `peer/announce`.
//
// Nodes announce `{url, node_type}` to each other on startup and on every
// announce tick. The receiver hands the announcement to the daemon's
// callback (which records the peer for membership) and answers with its own
// identity so the caller can mark it alive.

use serde::{Deserialize, Serialize};

use tessel_core::PeerType;

use super::HandlerError;
use crate::server::AnnounceCallback;

/// Request for peer announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRequest {
    /// The announcing node's public URL (its ring identity).
    pub url: String,
    pub node_type: PeerType,
}

/// Response to a peer announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceResponse {
    /// This node's public URL.
    pub url: String,
    pub node_type: PeerType,
    /// Acknowledgement message.
    pub message: String,
}

pub async fn handle_announce(
    request: AnnounceRequest,
    self_url: &str,
    self_type: PeerType,
    callback: Option<&AnnounceCallback>,
) -> Result<AnnounceResponse, HandlerError> {
    if request.url.is_empty() {
        return Err(HandlerError::Failed("Announcement without a url".to_string()));
    }
    tracing::debug!(
        "Received peer announcement from {} ({})",
        request.url,
        request.node_type
    );
    if let Some(cb) = callback {
        cb(request);
    }
    Ok(AnnounceResponse {
        url: self_url.to_string(),
        node_type: self_type,
        message: "Announcement received".to_string(),
    })
}
