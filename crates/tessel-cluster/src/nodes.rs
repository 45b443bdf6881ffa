// crates/tessel-cluster/src/nodes.rs
//
// Interchangeable `Node` adapters.
//
// `VirtualNode` answers from an in-process `BucketStore`; `RemoteNode`
// forwards each call to a peer's `node/*` JSON-RPC methods. Both return
// immediately with an element stream and do the work on a spawned task, so
// the coordinator never waits on one node while issuing calls to the next.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use tessel_core::hash::hash32;
use tessel_core::{
    ChangeSet, Element, ElementStream, Field, FieldValueScore, Key, Node, Presence, TesselError,
};
use tessel_store::BucketStore;

use crate::registry::NodeFactory;
use crate::transport::{EmptyParams, FieldParams, KeyParams, RpcClient, WriteParams};

/// Run `work` on its own task and deliver its single element on a fresh stream.
fn spawn_one<F>(work: F) -> ElementStream
where
    F: Future<Output = Element> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        // The receiver may have been dropped; nothing to do then.
        let _ = tx.send(work.await).await;
    });
    rx
}

// ---------------------------------------------------------------------------
// VirtualNode
// ---------------------------------------------------------------------------

/// A node backed by a local bucket store.
#[derive(Debug, Clone)]
pub struct VirtualNode {
    host: String,
    hash: u32,
    store: Arc<BucketStore>,
}

impl VirtualNode {
    pub fn new(host: impl Into<String>, store: Arc<BucketStore>) -> Self {
        let host = host.into();
        let hash = hash32(host.as_bytes());
        Self { host, hash, store }
    }

    pub fn store(&self) -> &Arc<BucketStore> {
        &self.store
    }
}

impl Node for VirtualNode {
    fn hash(&self) -> u32 {
        self.hash
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn insert(&self, key: &Key, members: Vec<FieldValueScore>) -> ElementStream {
        let store = self.store.clone();
        let key = key.clone();
        spawn_one(async move { Element::ChangeSet(store.insert(&key, members).await) })
    }

    fn delete(&self, key: &Key, members: Vec<FieldValueScore>) -> ElementStream {
        let store = self.store.clone();
        let key = key.clone();
        spawn_one(async move { Element::ChangeSet(store.delete(&key, members).await) })
    }

    fn select(&self, key: &Key, field: &Field) -> ElementStream {
        let store = self.store.clone();
        let (key, field) = (key.clone(), field.clone());
        spawn_one(async move { store.select(&key, &field).await.into() })
    }

    fn keys(&self) -> ElementStream {
        let store = self.store.clone();
        spawn_one(async move { Element::Keys(store.keys().await) })
    }

    fn size(&self, key: &Key) -> ElementStream {
        let store = self.store.clone();
        let key = key.clone();
        spawn_one(async move { Element::Int64(store.size(&key).await) })
    }

    fn members(&self, key: &Key) -> ElementStream {
        let store = self.store.clone();
        let key = key.clone();
        spawn_one(async move { Element::Fields(store.members(&key).await) })
    }

    fn score(&self, key: &Key, field: &Field) -> ElementStream {
        let store = self.store.clone();
        let (key, field) = (key.clone(), field.clone());
        spawn_one(async move { Element::Presence(store.score(&key, &field).await) })
    }
}

// ---------------------------------------------------------------------------
// RemoteNode
// ---------------------------------------------------------------------------

/// A node reached over the JSON-RPC transport.
///
/// Timeouts are the transport's: the shared `RpcClient` bounds every request.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    host: String,
    hash: u32,
    client: RpcClient,
}

impl RemoteNode {
    pub fn new(host: impl Into<String>, client: RpcClient) -> Self {
        let host = host.into();
        let hash = hash32(host.as_bytes());
        Self { host, hash, client }
    }
}

impl Node for RemoteNode {
    fn hash(&self) -> u32 {
        self.hash
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn insert(&self, key: &Key, members: Vec<FieldValueScore>) -> ElementStream {
        let (client, host) = (self.client.clone(), self.host.clone());
        let params = WriteParams {
            key: key.clone(),
            members,
        };
        spawn_one(async move {
            client
                .call::<_, ChangeSet>(&host, "node/insert", &params)
                .await
                .into()
        })
    }

    fn delete(&self, key: &Key, members: Vec<FieldValueScore>) -> ElementStream {
        let (client, host) = (self.client.clone(), self.host.clone());
        let params = WriteParams {
            key: key.clone(),
            members,
        };
        spawn_one(async move {
            client
                .call::<_, ChangeSet>(&host, "node/delete", &params)
                .await
                .into()
        })
    }

    fn select(&self, key: &Key, field: &Field) -> ElementStream {
        let (client, host) = (self.client.clone(), self.host.clone());
        let params = FieldParams {
            key: key.clone(),
            field: field.clone(),
        };
        spawn_one(async move {
            client
                .call::<_, FieldValueScore>(&host, "node/select", &params)
                .await
                .into()
        })
    }

    fn keys(&self) -> ElementStream {
        let (client, host) = (self.client.clone(), self.host.clone());
        spawn_one(async move {
            client
                .call::<_, Vec<Key>>(&host, "node/keys", &EmptyParams::default())
                .await
                .into()
        })
    }

    fn size(&self, key: &Key) -> ElementStream {
        let (client, host) = (self.client.clone(), self.host.clone());
        let params = KeyParams { key: key.clone() };
        spawn_one(async move {
            client
                .call::<_, i64>(&host, "node/size", &params)
                .await
                .into()
        })
    }

    fn members(&self, key: &Key) -> ElementStream {
        let (client, host) = (self.client.clone(), self.host.clone());
        let params = KeyParams { key: key.clone() };
        spawn_one(async move {
            client
                .call::<_, Vec<Field>>(&host, "node/members", &params)
                .await
                .into()
        })
    }

    fn score(&self, key: &Key, field: &Field) -> ElementStream {
        let (client, host) = (self.client.clone(), self.host.clone());
        let params = FieldParams {
            key: key.clone(),
            field: field.clone(),
        };
        spawn_one(async move {
            client
                .call::<_, Presence>(&host, "node/score", &params)
                .await
                .into()
        })
    }
}

// ---------------------------------------------------------------------------
// ClusterNodeFactory
// ---------------------------------------------------------------------------

/// Builds the local virtual node for this process's own host and remote
/// nodes for everyone else.
#[derive(Debug, Clone)]
pub struct ClusterNodeFactory {
    local: Option<Arc<VirtualNode>>,
    client: RpcClient,
}

impl ClusterNodeFactory {
    /// `local` is `None` on client-only processes, which hold no data.
    pub fn new(local: Option<Arc<VirtualNode>>, client: RpcClient) -> Self {
        Self { local, client }
    }
}

impl NodeFactory for ClusterNodeFactory {
    fn build(&self, host: &str) -> Arc<dyn Node> {
        match &self.local {
            Some(local) if local.host() == host => local.clone() as Arc<dyn Node>,
            _ => Arc::new(RemoteNode::new(host, self.client.clone())) as Arc<dyn Node>,
        }
    }
}

/// Convenience for callers that only need a single-element answer.
pub async fn first_element(mut stream: ElementStream) -> Result<Element, TesselError> {
    stream
        .recv()
        .await
        .ok_or_else(|| TesselError::Node("node closed its stream without a reply".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn node() -> VirtualNode {
        VirtualNode::new("http://local:1", Arc::new(BucketStore::new(4)))
    }

    #[tokio::test]
    async fn virtual_node_streams_close_after_one_reply() {
        let n = node();
        let key = Key::new("k");
        let mut rx = n.insert(&key, vec![FieldValueScore::new("f", b"v".to_vec(), 1)]);
        match rx.recv().await {
            Some(Element::ChangeSet(cs)) => assert_eq!(cs.success, vec![Field::new("f")]),
            other => panic!("Expected ChangeSet, got: {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn virtual_node_select_reports_not_found() {
        let n = node();
        let el = first_element(n.select(&Key::new("k"), &Field::new("f")))
            .await
            .unwrap();
        match el {
            Element::Error(e) => assert!(e.is_not_found()),
            other => panic!("Expected Error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn virtual_node_answers_metadata() {
        let n = node();
        let key = Key::new("k");
        first_element(n.insert(&key, vec![FieldValueScore::new("a", b"1".to_vec(), 1)]))
            .await
            .unwrap();
        assert_eq!(first_element(n.size(&key)).await.unwrap(), Element::Int64(1));
        assert_eq!(
            first_element(n.members(&key)).await.unwrap(),
            Element::Fields(vec![Field::new("a")])
        );
        assert_eq!(
            first_element(n.keys()).await.unwrap(),
            Element::Keys(vec![key.clone()])
        );
        match first_element(n.score(&key, &Field::new("a"))).await.unwrap() {
            Element::Presence(p) => assert!(p.present && p.inserted && p.score == 1),
            other => panic!("Expected Presence, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn remote_node_reports_unreachable_peer_as_error() {
        let client = RpcClient::new(Duration::from_millis(200));
        // Port 9 (discard) on localhost is not serving HTTP.
        let n = RemoteNode::new("http://127.0.0.1:9", client);
        assert_eq!(n.hash(), hash32(b"http://127.0.0.1:9"));
        match first_element(n.size(&Key::new("k"))).await.unwrap() {
            Element::Error(TesselError::Network(_)) => {}
            other => panic!("Expected network error, got: {:?}", other),
        }
    }

    #[test]
    fn factory_reuses_local_node() {
        let local = Arc::new(node());
        let factory = ClusterNodeFactory::new(
            Some(local.clone()),
            RpcClient::new(Duration::from_secs(1)),
        );
        let built = factory.build("http://local:1");
        assert_eq!(built.hash(), local.hash());
        let remote = factory.build("http://other:1");
        assert_eq!(remote.host(), "http://other:1");
    }
}
