// crates/tessel-daemon/src/loops.rs
//
// Background loops: membership discovery, hint broadcast and peer
// announcement. Each ticks on its own interval; a failed tick is logged and
// the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tessel_cluster::NodeRegistry;

use crate::peers::PeerMembers;

/// Reconcile the ring with the current store peers every `interval_ms`.
pub async fn run_discovery_loop(registry: Arc<NodeRegistry>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

    loop {
        interval.tick().await;

        match registry.update().await {
            Ok((0, 0)) => {}
            Ok((joined, left)) => {
                tracing::info!("Ring updated: {} joined, {} left", joined, left)
            }
            Err(e) => tracing::warn!("Discovery loop error: {}", e),
        }
    }
}

/// Ship changed membership hints to peers every `interval_ms`.
pub async fn run_broadcast_loop(registry: Arc<NodeRegistry>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

    loop {
        interval.tick().await;

        match registry.broadcast().await {
            Ok(0) => {}
            Ok(sent) => tracing::debug!("Broadcast {} hints", sent),
            Err(e) => tracing::warn!("Broadcast loop error: {}", e),
        }
    }
}

/// Re-announce this node to every known peer every `interval_ms`.
pub async fn run_announce_loop(peers: Arc<PeerMembers>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

    loop {
        interval.tick().await;
        peers.announce_to_all().await;
    }
}
