// crates/tessel-cluster/src/members.rs
//
// In-process membership bus.
//
// Lets several registries inside one process see each other as peers and
// exchange gossip events without a network: integration tests and
// single-process clusters join a shared `LocalBus`, each getting a
// `LocalMembers` handle that implements `MembershipSource`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tessel_core::{EventHandler, GossipEvent, MembershipSource, PeerType, TesselError};

#[derive(Default)]
struct BusState {
    members: BTreeMap<String, PeerType>,
    handlers: HashMap<String, HashMap<u64, Arc<dyn EventHandler>>>,
}

/// Shared membership table and event fan-out for in-process members.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<RwLock<BusState>>,
    next_handler_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus").finish()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `host` to the membership and return its handle.
    pub async fn join(&self, host: impl Into<String>, peer_type: PeerType) -> LocalMembers {
        let host = host.into();
        let mut state = self.state.write().await;
        state.members.insert(host.clone(), peer_type);
        state.handlers.entry(host.clone()).or_default();
        tracing::debug!("{} joined the local bus as {}", host, peer_type);
        LocalMembers {
            host,
            bus: self.clone(),
        }
    }

    /// Remove `host` and its handlers. Returns `false` if it was not a member.
    pub async fn leave(&self, host: &str) -> bool {
        let mut state = self.state.write().await;
        state.handlers.remove(host);
        let removed = state.members.remove(host).is_some();
        if removed {
            tracing::debug!("{} left the local bus", host);
        }
        removed
    }
}

/// One member's view of a `LocalBus`.
#[derive(Clone, Debug)]
pub struct LocalMembers {
    host: String,
    bus: LocalBus,
}

#[async_trait]
impl MembershipSource for LocalMembers {
    async fn current(&self, peer_type: PeerType) -> Result<Vec<String>, TesselError> {
        let state = self.bus.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|(_, t)| **t == peer_type)
            .map(|(h, _)| h.clone())
            .collect())
    }

    fn local_host(&self) -> &str {
        &self.host
    }

    async fn register_event_handler(&self, handler: Arc<dyn EventHandler>) -> u64 {
        let id = self.bus.next_handler_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.bus.state.write().await;
        state
            .handlers
            .entry(self.host.clone())
            .or_default()
            .insert(id, handler);
        id
    }

    async fn deregister_event_handler(&self, id: u64) -> bool {
        let mut state = self.bus.state.write().await;
        state
            .handlers
            .get_mut(&self.host)
            .map_or(false, |h| h.remove(&id).is_some())
    }

    /// Deliver to every other member's handlers, in turn.
    async fn dispatch_event(&self, event: GossipEvent) -> Result<(), TesselError> {
        let targets: Vec<Arc<dyn EventHandler>> = {
            let state = self.bus.state.read().await;
            state
                .handlers
                .iter()
                .filter(|(host, _)| **host != self.host)
                .flat_map(|(_, handlers)| handlers.values().cloned())
                .collect()
        };
        for handler in targets {
            handler.handle_event(event.clone()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<GossipEvent>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: GossipEvent) {
            self.seen.lock().await.push(event);
        }
    }

    fn event(sender: &str) -> GossipEvent {
        GossipEvent::Bloom {
            sender: sender.to_string(),
            peer_hash: 1,
            payload: vec![],
        }
    }

    #[tokio::test]
    async fn current_filters_by_peer_type() {
        let bus = LocalBus::new();
        let a = bus.join("a", PeerType::Store).await;
        bus.join("b", PeerType::Store).await;
        bus.join("c", PeerType::Client).await;

        assert_eq!(a.current(PeerType::Store).await.unwrap(), vec!["a", "b"]);
        assert_eq!(a.current(PeerType::Client).await.unwrap(), vec!["c"]);

        assert!(bus.leave("b").await);
        assert!(!bus.leave("b").await);
        assert_eq!(a.current(PeerType::Store).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn dispatch_skips_the_sender() {
        let bus = LocalBus::new();
        let a = bus.join("a", PeerType::Store).await;
        let b = bus.join("b", PeerType::Store).await;
        let on_a = Arc::new(Recorder::default());
        let on_b = Arc::new(Recorder::default());
        a.register_event_handler(on_a.clone()).await;
        let id = b.register_event_handler(on_b.clone()).await;

        a.dispatch_event(event("a")).await.unwrap();
        assert!(on_a.seen.lock().await.is_empty());
        assert_eq!(on_b.seen.lock().await.len(), 1);

        assert!(b.deregister_event_handler(id).await);
        assert!(!b.deregister_event_handler(id).await);
        a.dispatch_event(event("a")).await.unwrap();
        assert_eq!(on_b.seen.lock().await.len(), 1);
    }
}
