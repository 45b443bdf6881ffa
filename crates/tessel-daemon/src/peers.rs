// crates/tessel-daemon/src/peers.rs
//
// PeerMembers: cluster membership over HTTP.
//
// Tracks configured seed peers and peers discovered through `peer/announce`,
// remembers each peer's role and liveness, and carries gossip events to live
// peers through `gossip/event`. Implements `MembershipSource` so the node
// registry can build its ring from it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tessel_cluster::RpcClient;
use tessel_core::{EventHandler, GossipEvent, MembershipSource, PeerType, TesselError};
use tessel_rpc::handlers::gossip::GossipAck;
use tessel_rpc::handlers::peer::{AnnounceRequest, AnnounceResponse};
use tessel_rpc::AnnounceCallback;

/// Information about a peer node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerState {
    /// The peer's public URL.
    pub url: String,
    /// The peer's self-reported role, once it has answered or announced.
    pub node_type: Option<PeerType>,
    /// Whether the last communication attempt succeeded.
    pub alive: bool,
}

type Handlers = Arc<RwLock<HashMap<u64, Arc<dyn EventHandler>>>>;

/// Manages the set of known peers and the handlers fed by their gossip.
#[derive(Clone)]
pub struct PeerMembers {
    self_url: String,
    self_type: PeerType,
    /// Live peer state, updated on successful/failed communication.
    peer_state: Arc<RwLock<HashMap<String, PeerState>>>,
    handlers: Handlers,
    next_handler_id: Arc<AtomicU64>,
    client: RpcClient,
}

impl std::fmt::Debug for PeerMembers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerMembers")
            .field("self_url", &self.self_url)
            .field("self_type", &self.self_type)
            .finish()
    }
}

impl PeerMembers {
    /// Create the membership view from config values. Seed peers start out
    /// dead with an unknown role until they answer an announcement.
    pub fn new(
        self_url: impl Into<String>,
        self_type: PeerType,
        configured_peers: &[String],
        client: RpcClient,
    ) -> Self {
        let self_url = self_url.into();
        let state_map = configured_peers
            .iter()
            .filter(|url| **url != self_url)
            .map(|url| {
                (
                    url.clone(),
                    PeerState {
                        url: url.clone(),
                        node_type: None,
                        alive: false,
                    },
                )
            })
            .collect();

        Self {
            self_url,
            self_type,
            peer_state: Arc::new(RwLock::new(state_map)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_handler_id: Arc::new(AtomicU64::new(0)),
            client,
        }
    }

    /// Return URLs of peers that last responded successfully.
    pub async fn live_peer_urls(&self) -> Vec<String> {
        let state = self.peer_state.read().await;
        let mut urls: Vec<String> = state
            .values()
            .filter(|p| p.alive)
            .map(|p| p.url.clone())
            .collect();
        urls.sort();
        urls
    }

    pub async fn peer(&self, url: &str) -> Option<PeerState> {
        self.peer_state.read().await.get(url).cloned()
    }

    /// Add a peer learned from an announcement, or refresh a known one.
    ///
    /// Returns `true` if the peer was newly added.
    pub async fn add_discovered_peer(&self, url: String, node_type: PeerType) -> bool {
        if url == self.self_url {
            return false;
        }
        let mut state = self.peer_state.write().await;
        if let Some(peer) = state.get_mut(&url) {
            peer.node_type = Some(node_type);
            peer.alive = true;
            return false;
        }

        tracing::info!("Discovered new peer: {} ({})", url, node_type);
        state.insert(
            url.clone(),
            PeerState {
                url,
                node_type: Some(node_type),
                alive: true,
            },
        );
        true
    }

    /// Mark a peer as alive or dead after a communication attempt.
    pub async fn mark_peer(&self, url: &str, alive: bool, node_type: Option<PeerType>) {
        let mut state = self.peer_state.write().await;
        if let Some(peer) = state.get_mut(url) {
            if peer.alive != alive {
                tracing::debug!("Peer {} is now {}", url, if alive { "alive" } else { "dead" });
            }
            peer.alive = alive;
            if node_type.is_some() {
                peer.node_type = node_type;
            }
        }
    }

    /// Announce this node to one peer and record what it answers.
    pub async fn announce(&self, url: &str) -> Result<AnnounceResponse, TesselError> {
        let request = AnnounceRequest {
            url: self.self_url.clone(),
            node_type: self.self_type,
        };
        match self.client.call::<_, AnnounceResponse>(url, "peer/announce", &request).await {
            Ok(resp) => {
                self.mark_peer(url, true, Some(resp.node_type)).await;
                Ok(resp)
            }
            Err(e) => {
                self.mark_peer(url, false, None).await;
                Err(e)
            }
        }
    }

    /// Send `peer/announce` to every known peer.
    /// Fire-and-forget: failures are logged, not propagated.
    pub async fn announce_to_all(&self) {
        let urls: Vec<String> = self.peer_state.read().await.keys().cloned().collect();
        for url in urls {
            let members = self.clone();
            tokio::spawn(async move {
                match members.announce(&url).await {
                    Ok(resp) => tracing::debug!("Announced to peer {} ({})", url, resp.node_type),
                    Err(e) => tracing::warn!("Failed to announce to peer {}: {}", url, e),
                }
            });
        }
    }

    /// Callback for the RPC server: records announcing peers.
    pub fn announce_callback(&self) -> AnnounceCallback {
        let members = self.clone();
        Arc::new(move |req: AnnounceRequest| {
            let members = members.clone();
            tokio::spawn(async move {
                members.add_discovered_peer(req.url, req.node_type).await;
            });
        })
    }

    /// Handler for the RPC server: hands events from peers to local handlers.
    pub fn delivery(&self) -> Arc<dyn EventHandler> {
        Arc::new(LocalDelivery {
            handlers: self.handlers.clone(),
        })
    }
}

struct LocalDelivery {
    handlers: Handlers,
}

#[async_trait]
impl EventHandler for LocalDelivery {
    async fn handle_event(&self, event: GossipEvent) {
        let targets: Vec<Arc<dyn EventHandler>> =
            self.handlers.read().await.values().cloned().collect();
        for handler in targets {
            handler.handle_event(event.clone()).await;
        }
    }
}

#[async_trait]
impl MembershipSource for PeerMembers {
    async fn current(&self, peer_type: PeerType) -> Result<Vec<String>, TesselError> {
        let state = self.peer_state.read().await;
        let mut hosts: Vec<String> = state
            .values()
            .filter(|p| p.alive && p.node_type == Some(peer_type))
            .map(|p| p.url.clone())
            .collect();
        if self.self_type == peer_type {
            hosts.push(self.self_url.clone());
        }
        hosts.sort();
        Ok(hosts)
    }

    fn local_host(&self) -> &str {
        &self.self_url
    }

    async fn register_event_handler(&self, handler: Arc<dyn EventHandler>) -> u64 {
        let id = self.next_handler_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.handlers.write().await.insert(id, handler);
        id
    }

    async fn deregister_event_handler(&self, id: u64) -> bool {
        self.handlers.write().await.remove(&id).is_some()
    }

    /// Post the event to every live peer concurrently and wait for the
    /// replies. Peers that fail are marked dead and reported together.
    async fn dispatch_event(&self, event: GossipEvent) -> Result<(), TesselError> {
        let mut sends = Vec::new();
        for url in self.live_peer_urls().await {
            let members = self.clone();
            let event = event.clone();
            let handle = tokio::spawn(async move {
                let sent: Result<GossipAck, TesselError> =
                    members.client.call(&url, "gossip/event", &event).await;
                if let Err(e) = &sent {
                    tracing::warn!("Gossip to peer {} failed: {}", url, e);
                    members.mark_peer(&url, false, None).await;
                }
                sent.map(|_| ()).map_err(|e| format!("{}: {}", url, e))
            });
            sends.push(handle);
        }

        let mut failures = Vec::new();
        for handle in sends {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(e) => failures.push(format!("gossip task failed: {}", e)),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TesselError::Network(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tessel_cluster::registry::{NodeRegistry, RegistryConfig};
    use tessel_cluster::transport::EmptyParams;
    use tessel_cluster::ClusterNodeFactory;
    use tessel_core::hash::hash32;
    use tessel_core::{Key, Quorum};
    use tessel_rpc::handlers::node::StatusResponse;
    use tessel_rpc::{NodeInfo, RpcConfig, TesselRpcServer};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<GossipEvent>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: GossipEvent) {
            self.0.lock().await.push(event);
        }
    }

    fn client() -> RpcClient {
        RpcClient::new(Duration::from_millis(500))
    }

    fn free_url() -> (u16, String) {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        (port, format!("http://127.0.0.1:{}", port))
    }

    /// Serve a peer's gossip and announce endpoints; returns its membership.
    async fn spawn_peer(seeds: &[String], node_type: PeerType) -> PeerMembers {
        let (port, url) = free_url();
        let members = PeerMembers::new(url.clone(), node_type, seeds, client());
        let server = TesselRpcServer::new(
            RpcConfig {
                host: "127.0.0.1".into(),
                port,
            },
            NodeInfo {
                url: url.clone(),
                node_type,
            },
        )
        .with_gossip_handler(members.delivery())
        .with_announce_callback(members.announce_callback());
        tokio::spawn(async move {
            let _ = server.start().await;
        });
        for _ in 0..100 {
            let status: Result<StatusResponse, TesselError> =
                client().call(&url, "node/status", &EmptyParams::default()).await;
            if status.is_ok() {
                return members;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("peer at {} never became ready", url);
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    fn bloom(sender: &str) -> GossipEvent {
        GossipEvent::Bloom {
            sender: sender.to_string(),
            peer_hash: 7,
            payload: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn seeds_are_unknown_until_announced() {
        let members = PeerMembers::new(
            "http://127.0.0.1:1",
            PeerType::Store,
            &["http://127.0.0.1:2".to_string(), "http://127.0.0.1:1".to_string()],
            client(),
        );
        let seed = members.peer("http://127.0.0.1:2").await.unwrap();
        assert_eq!(seed.node_type, None);
        assert!(!seed.alive);
        assert!(members.peer("http://127.0.0.1:1").await.is_none());
        assert_eq!(
            members.current(PeerType::Store).await.unwrap(),
            vec!["http://127.0.0.1:1".to_string()]
        );
        assert!(members.current(PeerType::Client).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn discovered_peers_join_by_role() {
        let members = PeerMembers::new("http://127.0.0.1:1", PeerType::Client, &[], client());
        assert!(members.add_discovered_peer("http://127.0.0.1:3".into(), PeerType::Store).await);
        assert!(!members.add_discovered_peer("http://127.0.0.1:3".into(), PeerType::Store).await);
        assert!(members.add_discovered_peer("http://127.0.0.1:4".into(), PeerType::Client).await);
        assert!(!members.add_discovered_peer("http://127.0.0.1:1".into(), PeerType::Client).await);

        assert_eq!(
            members.current(PeerType::Store).await.unwrap(),
            vec!["http://127.0.0.1:3".to_string()]
        );
        assert_eq!(members.current(PeerType::Client).await.unwrap().len(), 2);

        members.mark_peer("http://127.0.0.1:3", false, None).await;
        assert!(members.current(PeerType::Store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handlers_register_and_deregister() {
        let members = PeerMembers::new("http://127.0.0.1:1", PeerType::Store, &[], client());
        let recorder = Arc::new(Recorder::default());
        let id = members.register_event_handler(recorder.clone()).await;

        members.delivery().handle_event(bloom("http://127.0.0.1:2")).await;
        assert_eq!(recorder.0.lock().await.len(), 1);

        assert!(members.deregister_event_handler(id).await);
        assert!(!members.deregister_event_handler(id).await);
        members.delivery().handle_event(bloom("http://127.0.0.1:2")).await;
        assert_eq!(recorder.0.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn announce_marks_both_sides_alive() {
        let b = spawn_peer(&[], PeerType::Store).await;
        let b_url = b.local_host().to_string();
        let a = spawn_peer(&[b_url.clone()], PeerType::Client).await;
        let a_url = a.local_host().to_string();

        let resp = a.announce(&b_url).await.unwrap();
        assert_eq!(resp.url, b_url);
        assert_eq!(resp.node_type, PeerType::Store);
        assert_eq!(a.current(PeerType::Store).await.unwrap(), vec![b_url.clone()]);

        // B learns about A from the announcement itself.
        assert!(eventually(|| async { b.peer(&a_url).await.is_some() }).await);
        assert_eq!(b.current(PeerType::Client).await.unwrap(), vec![a_url]);
    }

    #[tokio::test]
    async fn unreachable_seed_is_marked_dead() {
        let (_, dead) = free_url();
        let a = PeerMembers::new("http://127.0.0.1:1", PeerType::Store, &[dead.clone()], client());
        a.add_discovered_peer(dead.clone(), PeerType::Store).await;
        assert!(a.announce(&dead).await.is_err());
        assert!(!a.peer(&dead).await.unwrap().alive);
    }

    #[tokio::test]
    async fn gossip_reaches_live_peers_over_http() {
        let b = spawn_peer(&[], PeerType::Store).await;
        let b_url = b.local_host().to_string();
        let recorder = Arc::new(Recorder::default());
        b.register_event_handler(recorder.clone()).await;

        let (_, dead) = free_url();
        let a = spawn_peer(&[b_url.clone(), dead.clone()], PeerType::Store).await;
        a.announce(&b_url).await.unwrap();
        a.add_discovered_peer(dead.clone(), PeerType::Store).await;

        let event = bloom(a.local_host());
        match a.dispatch_event(event.clone()).await {
            Err(TesselError::Network(msg)) => {
                assert!(msg.contains(&dead), "got: {}", msg);
                assert_eq!(msg.split("; ").count(), 1, "got: {}", msg);
            }
            other => panic!("Expected a delivery failure, got: {:?}", other),
        }

        // Delivery completed before dispatch returned.
        assert_eq!(recorder.0.lock().await.as_slice(), &[event.clone()]);
        assert!(!a.peer(&dead).await.unwrap().alive);

        // With the dead peer dropped, the next dispatch reaches everyone.
        a.dispatch_event(event).await.unwrap();
        assert_eq!(recorder.0.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn undelivered_hint_stays_pending_until_it_ships() {
        let (_, dead) = free_url();
        let a = PeerMembers::new("http://127.0.0.1:1", PeerType::Store, &[], client());
        a.add_discovered_peer(dead.clone(), PeerType::Store).await;
        let registry = NodeRegistry::new(
            RegistryConfig {
                replication_factor: 8,
                hint_capacity: 1024,
                hint_recursions: 3,
            },
            Arc::new(a.clone()),
            Arc::new(ClusterNodeFactory::new(None, client())),
        );
        assert_eq!(registry.update().await.unwrap(), (2, 0));

        let key = Key::new("k");
        let (_, commit) = registry.write(&key, Quorum::Strong).await;
        assert_eq!(commit.commit(&[hash32(b"http://127.0.0.1:1")]).await, 1);

        assert!(matches!(
            registry.broadcast().await,
            Err(TesselError::Network(_))
        ));
        assert!(!a.peer(&dead).await.unwrap().alive);

        // The failed hint is shipped again rather than forgotten.
        assert_eq!(registry.broadcast().await.unwrap(), 1);
        assert_eq!(registry.broadcast().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn announce_to_all_reaches_every_seed() {
        let b = spawn_peer(&[], PeerType::Store).await;
        let c = spawn_peer(&[], PeerType::Store).await;
        let seeds = vec![b.local_host().to_string(), c.local_host().to_string()];
        let a = spawn_peer(&seeds, PeerType::Store).await;

        a.announce_to_all().await;
        assert!(eventually(|| async { a.live_peer_urls().await.len() == 2 }).await);
        let mut expected = seeds.clone();
        expected.push(a.local_host().to_string());
        expected.sort();
        assert_eq!(a.current(PeerType::Store).await.unwrap(), expected);
    }
}
