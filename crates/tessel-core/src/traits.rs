// crates/tessel-core/src/traits.rs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::element::ElementStream;
use crate::error::TesselError;
use crate::gossip::GossipEvent;
use crate::types::{Field, FieldValueScore, Key};

/// A replica endpoint the coordinator can address.
///
/// Implemented by tessel-store (the in-process bucket store), and by
/// tessel-cluster (virtual nodes and remote HTTP nodes). Every call returns
/// immediately with a stream; the node delivers zero or more elements on it
/// and closes it when done. A node that cannot serve a call sends a single
/// `Element::Error`.
pub trait Node: Send + Sync {
    /// Identity of the node: the murmur3 hash of its host.
    fn hash(&self) -> u32;

    /// Address this node was built from.
    fn host(&self) -> &str;

    /// Write field values under `key`. Answers with one `ChangeSet`.
    fn insert(&self, key: &Key, members: Vec<FieldValueScore>) -> ElementStream;

    /// Tombstone fields under `key`. Values are ignored. Answers with one `ChangeSet`.
    fn delete(&self, key: &Key, members: Vec<FieldValueScore>) -> ElementStream;

    /// Read one live field. Answers with one `FieldValueScore`, or an error
    /// when the field is absent or deleted.
    fn select(&self, key: &Key, field: &Field) -> ElementStream;

    /// All keys with at least one live field. Answers with `Keys`.
    fn keys(&self) -> ElementStream;

    /// Live field count under `key`. Answers with `Int64`.
    fn size(&self, key: &Key) -> ElementStream;

    /// Live field names under `key`. Answers with `Fields`.
    fn members(&self, key: &Key) -> ElementStream;

    /// Presence snapshot for one field. Answers with `Presence`.
    fn score(&self, key: &Key, field: &Field) -> ElementStream;
}

/// Role a peer plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerType {
    /// Holds data.
    Store,
    /// Coordinates only; holds no data.
    Client,
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerType::Store => write!(f, "store"),
            PeerType::Client => write!(f, "client"),
        }
    }
}

impl std::str::FromStr for PeerType {
    type Err = TesselError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "store" => Ok(PeerType::Store),
            "client" => Ok(PeerType::Client),
            other => Err(TesselError::InvalidState(format!("unknown peer type '{}'", other))),
        }
    }
}

/// Receives gossip events dispatched through a `MembershipSource`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: GossipEvent);
}

/// Source of cluster membership and carrier of gossip events.
///
/// Implemented by tessel-cluster (an in-process bus for tests and
/// single-process clusters) and tessel-daemon (HTTP peers).
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Hosts of every currently known peer of `peer_type`, including self
    /// when self has that role.
    async fn current(&self, peer_type: PeerType) -> Result<Vec<String>, TesselError>;

    /// Host of the local process.
    fn local_host(&self) -> &str;

    /// Register a handler. Returns an id usable for deregistration.
    async fn register_event_handler(&self, handler: Arc<dyn EventHandler>) -> u64;

    /// Remove a handler. Returns `false` if the id was unknown.
    async fn deregister_event_handler(&self, id: u64) -> bool;

    /// Deliver `event` to every peer's handlers (best effort).
    async fn dispatch_event(&self, event: GossipEvent) -> Result<(), TesselError>;
}
