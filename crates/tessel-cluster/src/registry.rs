// crates/tessel-cluster/src/registry.rs
//
// NodeRegistry: ring membership, per-peer Bloom hints, and hint gossip.
//
// The registry owns the hash ring and one membership hint per store peer
// (self included), all behind a single async RwLock. Replica selection takes
// the read lock; membership reconciliation, gossip merges and write commits
// take the write lock.
//
// Each hint carries a logical clock bumped whenever it gains bits. The
// broadcast tick ships every hint whose clock moved past the last broadcast
// value; a merge received from gossip that leaves nothing local pending
// advances both clocks together so the merged view is not echoed back.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use tessel_core::hash::hash32;
use tessel_core::quorum::majority;
use tessel_core::{
    EventHandler, GossipEvent, Key, MembershipSource, Node, PeerType, Quorum, TesselError,
};
use tessel_store::{BloomFilter, HashRing};

/// Builds a `Node` for a host that joined the ring.
pub trait NodeFactory: Send + Sync {
    fn build(&self, host: &str) -> Arc<dyn Node>;
}

/// Ring and hint parameters. Every member of a cluster must agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub replication_factor: usize,
    pub hint_capacity: u64,
    pub hint_recursions: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            replication_factor: 32,
            hint_capacity: 65_536,
            hint_recursions: 4,
        }
    }
}

struct PeerEntry {
    node: Arc<dyn Node>,
    hint: BloomFilter,
    /// Bumped every time `hint` gains bits.
    clock: u64,
    /// Value of `clock` when the hint was last shipped (or received).
    broadcast_clock: u64,
}

struct RegistryState {
    ring: HashRing,
    peers: HashMap<u32, PeerEntry>,
}

/// Cluster view: which store peers exist and which keys each is believed to hold.
pub struct NodeRegistry {
    host: String,
    config: RegistryConfig,
    members: Arc<dyn MembershipSource>,
    factory: Arc<dyn NodeFactory>,
    state: Arc<RwLock<RegistryState>>,
    handler_id: AtomicU64,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("host", &self.host)
            .field("config", &self.config)
            .finish()
    }
}

impl NodeRegistry {
    /// Create an empty registry. Call `start` to receive gossip and `update`
    /// to populate the ring.
    pub fn new(
        config: RegistryConfig,
        members: Arc<dyn MembershipSource>,
        factory: Arc<dyn NodeFactory>,
    ) -> Self {
        Self {
            host: members.local_host().to_string(),
            config,
            members,
            factory,
            state: Arc::new(RwLock::new(RegistryState {
                ring: HashRing::new(config.replication_factor),
                peers: HashMap::new(),
            })),
            handler_id: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Register for hint gossip with the membership source.
    pub async fn start(&self) {
        if self.handler_id.load(Ordering::SeqCst) != 0 {
            return;
        }
        let handler = Arc::new(HintReceiver {
            host: self.host.clone(),
            state: self.state.clone(),
        });
        let id = self.members.register_event_handler(handler).await;
        self.handler_id.store(id, Ordering::SeqCst);
    }

    /// Stop receiving hint gossip.
    pub async fn stop(&self) {
        let id = self.handler_id.swap(0, Ordering::SeqCst);
        if id != 0 {
            self.members.deregister_event_handler(id).await;
        }
    }

    /// Reconcile the ring with the membership source's current store peers.
    ///
    /// Departed peers lose their ring positions and hint; new peers join the
    /// ring with an empty hint, and every non-empty hint is queued for the
    /// next broadcast. Returns `(joined, left)`.
    pub async fn update(&self) -> Result<(usize, usize), TesselError> {
        let current: HashSet<String> = self
            .members
            .current(PeerType::Store)
            .await?
            .into_iter()
            .collect();

        let mut state = self.state.write().await;

        let departed: Vec<String> = state
            .ring
            .hosts()
            .into_iter()
            .filter(|h| !current.contains(h))
            .collect();
        for host in &departed {
            state.ring.remove(host);
            state.peers.remove(&hash32(host.as_bytes()));
            tracing::info!("Peer {} left the ring", host);
        }

        let mut joined = 0;
        for host in &current {
            if state.ring.contains(host) {
                continue;
            }
            let node = self.factory.build(host);
            if state.peers.contains_key(&node.hash()) {
                tracing::warn!(
                    "Peer {} collides with an existing peer hash {}; skipping",
                    host,
                    node.hash()
                );
                continue;
            }
            if !state.ring.add(host) {
                tracing::warn!("Peer {} has a virtual node collision on the ring", host);
            }
            state.peers.insert(
                node.hash(),
                PeerEntry {
                    node,
                    hint: BloomFilter::new(self.config.hint_capacity, self.config.hint_recursions),
                    clock: 0,
                    broadcast_clock: 0,
                },
            );
            joined += 1;
            tracing::info!("Peer {} joined the ring", host);
        }

        // Newcomers, including peers returning from a failed delivery, have
        // seen none of the hints shipped so far.
        if joined > 0 {
            for peer in state.peers.values_mut() {
                peer.broadcast_clock = 0;
            }
        }

        Ok((joined, departed.len()))
    }

    /// Ship every hint that changed since its last broadcast.
    ///
    /// Returns the number of hints dispatched. A dispatch that fails to reach
    /// any live peer leaves the hint pending for the next tick.
    pub async fn broadcast(&self) -> Result<usize, TesselError> {
        let pending: Vec<(u32, u64, Vec<u8>)> = {
            let state = self.state.read().await;
            state
                .peers
                .iter()
                .filter(|(_, p)| p.clock > p.broadcast_clock)
                .map(|(hash, p)| (*hash, p.clock, p.hint.to_bytes()))
                .collect()
        };

        let mut sent = 0;
        let mut failures = Vec::new();
        for (peer_hash, clock, payload) in pending {
            let event = GossipEvent::Bloom {
                sender: self.host.clone(),
                peer_hash,
                payload,
            };
            match self.members.dispatch_event(event).await {
                Ok(()) => {
                    let mut state = self.state.write().await;
                    if let Some(peer) = state.peers.get_mut(&peer_hash) {
                        peer.broadcast_clock = peer.broadcast_clock.max(clock);
                    }
                    sent += 1;
                    tracing::debug!("Broadcast hint for peer {} at clock {}", peer_hash, clock);
                }
                Err(e) => failures.push(format!("peer {}: {}", peer_hash, e)),
            }
        }

        if failures.is_empty() {
            Ok(sent)
        } else {
            Err(TesselError::Network(failures.join("; ")))
        }
    }

    /// Nodes to query for `key` under `quorum`.
    ///
    /// - `One`: the first host, in shuffled order, whose hint holds the key.
    /// - `Strong`: every host, shuffled.
    /// - `Consensus`: the majority nearest the key on the ring whose hints
    ///   hold it, widened to any other host whose hint holds it when that
    ///   falls short of a majority.
    pub async fn read(&self, key: &Key, quorum: Quorum) -> Vec<Arc<dyn Node>> {
        let state = self.state.read().await;
        select_read(&state, key, quorum)
    }

    /// Nodes to write `key` to under `quorum`, plus the commit that records
    /// the key in the hints of the nodes that actually succeeded.
    ///
    /// Selection follows `read`, then falls back to ring placement where hints
    /// cannot supply enough nodes (a key nobody holds yet): `One` takes the
    /// key's ring owner, `Consensus` pads with ring successors up to a
    /// majority.
    pub async fn write(&self, key: &Key, quorum: Quorum) -> (Vec<Arc<dyn Node>>, WriteCommit) {
        let state = self.state.read().await;
        let mut nodes = select_read(&state, key, quorum);
        match quorum {
            Quorum::Strong => {}
            Quorum::One => {
                if nodes.is_empty() {
                    nodes = hosts_to_nodes(&state, state.ring.lookup_n(key, 1));
                }
            }
            Quorum::Consensus => {
                let threshold = majority(state.ring.len());
                if nodes.len() < threshold {
                    let chosen: HashSet<u32> = nodes.iter().map(|n| n.hash()).collect();
                    let padding = state
                        .ring
                        .lookup_n(key, state.ring.len())
                        .into_iter()
                        .filter(|h| !chosen.contains(&hash32(h.as_bytes())))
                        .take(threshold - nodes.len())
                        .collect();
                    nodes.extend(hosts_to_nodes(&state, padding));
                }
            }
        }
        let commit = WriteCommit {
            key: key.clone(),
            state: self.state.clone(),
        };
        (nodes, commit)
    }

    /// Every store node on the ring, shuffled.
    pub async fn all(&self) -> Vec<Arc<dyn Node>> {
        let state = self.state.read().await;
        shuffled_nodes(&state)
    }

    /// Hosts currently on the ring, sorted.
    pub async fn hosts(&self) -> Vec<String> {
        self.state.read().await.ring.hosts()
    }

    /// Whether the hint held for `peer_hash` contains `key`.
    pub async fn hint_contains(&self, peer_hash: u32, key: &Key) -> bool {
        let state = self.state.read().await;
        state
            .peers
            .get(&peer_hash)
            .is_some_and(|p| p.hint.contains(key.as_str().as_bytes()))
    }

    /// Logical clock of the hint held for `peer_hash`.
    pub async fn hint_clock(&self, peer_hash: u32) -> Option<u64> {
        let state = self.state.read().await;
        state.peers.get(&peer_hash).map(|p| p.clock)
    }
}

fn shuffled_nodes(state: &RegistryState) -> Vec<Arc<dyn Node>> {
    let mut nodes: Vec<Arc<dyn Node>> = state.peers.values().map(|p| p.node.clone()).collect();
    nodes.shuffle(&mut rand::thread_rng());
    nodes
}

fn hosts_to_nodes(state: &RegistryState, hosts: Vec<String>) -> Vec<Arc<dyn Node>> {
    hosts
        .iter()
        .filter_map(|h| state.peers.get(&hash32(h.as_bytes())))
        .map(|p| p.node.clone())
        .collect()
}

fn holds(state: &RegistryState, node: &Arc<dyn Node>, key: &Key) -> bool {
    state
        .peers
        .get(&node.hash())
        .is_some_and(|p| p.hint.contains(key.as_str().as_bytes()))
}

fn select_read(state: &RegistryState, key: &Key, quorum: Quorum) -> Vec<Arc<dyn Node>> {
    match quorum {
        Quorum::One => shuffled_nodes(state)
            .into_iter()
            .find(|n| holds(state, n, key))
            .into_iter()
            .collect(),
        Quorum::Strong => shuffled_nodes(state),
        Quorum::Consensus => {
            let threshold = majority(state.ring.len());
            let mut nodes: Vec<Arc<dyn Node>> =
                hosts_to_nodes(state, state.ring.lookup_n(key, threshold))
                    .into_iter()
                    .filter(|n| holds(state, n, key))
                    .collect();
            if nodes.len() < threshold {
                let chosen: HashSet<u32> = nodes.iter().map(|n| n.hash()).collect();
                let extra: Vec<Arc<dyn Node>> = shuffled_nodes(state)
                    .into_iter()
                    .filter(|n| !chosen.contains(&n.hash()) && holds(state, n, key))
                    .take(threshold - nodes.len())
                    .collect();
                nodes.extend(extra);
            }
            nodes
        }
    }
}

// ---------------------------------------------------------------------------
// WriteCommit
// ---------------------------------------------------------------------------

/// Deferred hint update for one write.
///
/// Obtained from `NodeRegistry::write`; the caller commits only the hashes of
/// nodes that confirmed the write, so a failed write never marks a node as
/// holding the key.
pub struct WriteCommit {
    key: Key,
    state: Arc<RwLock<RegistryState>>,
}

impl std::fmt::Debug for WriteCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCommit").field("key", &self.key).finish()
    }
}

impl WriteCommit {
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Add the key to the hints of `hashes`. Returns how many hints changed.
    pub async fn commit(self, hashes: &[u32]) -> usize {
        let mut state = self.state.write().await;
        let item = self.key.as_str().as_bytes();
        let mut changed = 0;
        for hash in hashes {
            if let Some(peer) = state.peers.get_mut(hash) {
                if !peer.hint.contains(item) {
                    peer.hint.add(item);
                    peer.clock += 1;
                    changed += 1;
                }
            }
        }
        changed
    }
}

// ---------------------------------------------------------------------------
// Gossip receive
// ---------------------------------------------------------------------------

struct HintReceiver {
    host: String,
    state: Arc<RwLock<RegistryState>>,
}

#[async_trait]
impl EventHandler for HintReceiver {
    async fn handle_event(&self, event: GossipEvent) {
        let GossipEvent::Bloom {
            sender,
            peer_hash,
            payload,
        } = event;
        if sender == self.host {
            return;
        }

        let incoming = match BloomFilter::from_bytes(&payload) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!("Malformed hint from {} for peer {}: {}", sender, peer_hash, e);
                return;
            }
        };

        let mut state = self.state.write().await;
        let Some(peer) = state.peers.get_mut(&peer_hash) else {
            tracing::debug!("Hint from {} for unknown peer {}; ignoring", sender, peer_hash);
            return;
        };
        match peer.hint.union(&incoming) {
            Ok(true) => {
                let pending = peer.clock > peer.broadcast_clock;
                peer.clock += 1;
                if !pending {
                    peer.broadcast_clock = peer.clock;
                }
                tracing::debug!(
                    "Merged hint from {} for peer {} (clock {})",
                    sender,
                    peer_hash,
                    peer.clock
                );
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Rejected hint from {} for peer {}: {}", sender, peer_hash, e),
        }
    }
}
