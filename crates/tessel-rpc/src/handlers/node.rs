// crates/tessel-rpc/src/handlers/node.rs
//
// Per-replica handlers: the local storage engine behind `node/*`, plus
// `node/status`.
//
// These are the server half of `RemoteNode`: every method takes the same
// params type the client sends and answers with exactly the payload the
// matching `Element` variant carries.

use serde::{Deserialize, Serialize};

use tessel_cluster::registry::NodeRegistry;
use tessel_cluster::transport::{EmptyParams, FieldParams, KeyParams, WriteParams};
use tessel_core::{ChangeSet, Field, FieldValueScore, Key, PeerType, Presence};
use tessel_store::BucketStore;

use super::HandlerError;

pub async fn handle_insert(store: &BucketStore, request: WriteParams) -> Result<ChangeSet, HandlerError> {
    Ok(store.insert(&request.key, request.members).await)
}

pub async fn handle_delete(store: &BucketStore, request: WriteParams) -> Result<ChangeSet, HandlerError> {
    Ok(store.delete(&request.key, request.members).await)
}

pub async fn handle_select(
    store: &BucketStore,
    request: FieldParams,
) -> Result<FieldValueScore, HandlerError> {
    Ok(store.select(&request.key, &request.field).await?)
}

pub async fn handle_keys(store: &BucketStore, _request: EmptyParams) -> Result<Vec<Key>, HandlerError> {
    Ok(store.keys().await)
}

pub async fn handle_size(store: &BucketStore, request: KeyParams) -> Result<i64, HandlerError> {
    Ok(store.size(&request.key).await)
}

pub async fn handle_members(store: &BucketStore, request: KeyParams) -> Result<Vec<Field>, HandlerError> {
    Ok(store.members(&request.key).await)
}

pub async fn handle_score(store: &BucketStore, request: FieldParams) -> Result<Presence, HandlerError> {
    Ok(store.score(&request.key, &request.field).await)
}

// ---------------------------------------------------------------------------
// node/status
// ---------------------------------------------------------------------------

/// Response describing this node and its view of the ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// This node's ring identity.
    pub host: String,
    pub node_type: PeerType,
    /// Software version.
    pub version: String,
    /// Store hosts currently on this node's ring, sorted.
    pub ring: Vec<String>,
}

pub async fn handle_status(
    _request: EmptyParams,
    host: &str,
    node_type: PeerType,
    registry: Option<&NodeRegistry>,
) -> Result<StatusResponse, HandlerError> {
    let ring = match registry {
        Some(registry) => registry.hosts().await,
        None => Vec::new(),
    };
    Ok(StatusResponse {
        host: host.to_string(),
        node_type,
        version: env!("CARGO_PKG_VERSION").to_string(),
        ring,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn select_of_missing_field_is_not_found() {
        let store = BucketStore::new(2);
        let err = handle_select(
            &store,
            FieldParams {
                key: Key::new("k"),
                field: Field::new("f"),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HandlerError::NotFound(_)));
    }

    #[tokio::test]
    async fn writes_and_reads_hit_the_store() {
        let store = BucketStore::new(2);
        let changes = handle_insert(
            &store,
            WriteParams {
                key: Key::new("k"),
                members: vec![FieldValueScore::new("f", b"v".to_vec(), 1)],
            },
        )
        .await
        .unwrap();
        assert_eq!(changes.success, vec![Field::new("f")]);

        let size = handle_size(&store, KeyParams { key: Key::new("k") }).await.unwrap();
        assert_eq!(size, 1);
        let keys = handle_keys(&store, EmptyParams::default()).await.unwrap();
        assert_eq!(keys, vec![Key::new("k")]);
    }

    #[tokio::test]
    async fn status_without_registry_has_empty_ring() {
        let status = handle_status(EmptyParams::default(), "http://a", PeerType::Client, None)
            .await
            .unwrap();
        assert_eq!(status.host, "http://a");
        assert_eq!(status.node_type, PeerType::Client);
        assert!(status.ring.is_empty());
    }
}
