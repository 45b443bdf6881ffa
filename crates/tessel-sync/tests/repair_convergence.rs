// crates/tessel-sync/tests/repair_convergence.rs
//
// Repair strategy and repair queue against an in-process cluster.
//
// Every store is a `VirtualNode` over its own `BucketStore`; registries see
// each other through a `LocalBus`, so the full read/write selection and hint
// commit paths run exactly as they do over HTTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tessel_cluster::registry::{NodeFactory, NodeRegistry, RegistryConfig};
use tessel_cluster::{LocalBus, RemoteNode, RpcClient, VirtualNode};
use tessel_core::hash::hash32;
use tessel_core::{Field, FieldValueScore, Key, Node, PeerType, Presence, TesselError};
use tessel_store::BucketStore;
use tessel_sync::{RepairItem, RepairQueue, Repairer};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Nodes(HashMap<String, Arc<dyn Node>>);

impl NodeFactory for Nodes {
    fn build(&self, host: &str) -> Arc<dyn Node> {
        self.0
            .get(host)
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(VirtualNode::new(host, Arc::new(BucketStore::new(4)))) as Arc<dyn Node>
            })
    }
}

struct Cluster {
    stores: HashMap<String, Arc<BucketStore>>,
    registry: Arc<NodeRegistry>,
}

impl Cluster {
    fn store(&self, host: &str) -> &BucketStore {
        &self.stores[host]
    }
}

/// Build a cluster of virtual stores plus any extra pre-built nodes.
async fn cluster(hosts: &[&str], extra: Vec<Arc<dyn Node>>) -> Cluster {
    let bus = LocalBus::new();
    let mut stores = HashMap::new();
    let mut nodes: HashMap<String, Arc<dyn Node>> = HashMap::new();
    for host in hosts {
        let store = Arc::new(BucketStore::new(4));
        stores.insert(host.to_string(), store.clone());
        nodes.insert(host.to_string(), Arc::new(VirtualNode::new(*host, store)));
    }
    for node in extra {
        nodes.insert(node.host().to_string(), node);
    }

    let mut members = None;
    for host in nodes.keys() {
        let handle = bus.join(host.clone(), PeerType::Store).await;
        if host == hosts[0] {
            members = Some(handle);
        }
    }
    let members = members.expect("first host joined");

    let config = RegistryConfig {
        replication_factor: 8,
        hint_capacity: 4096,
        hint_recursions: 3,
    };
    let registry = Arc::new(NodeRegistry::new(config, Arc::new(members), Arc::new(Nodes(nodes))));
    registry.update().await.unwrap();
    Cluster { stores, registry }
}

fn fvs(field: &str, value: &str, score: i64) -> FieldValueScore {
    FieldValueScore::new(field, value.as_bytes().to_vec(), score)
}

fn item(key: &Key, field: &str, value: &str) -> RepairItem {
    RepairItem::new(key.clone(), Field::new(field), value.as_bytes().to_vec())
}

// ---------------------------------------------------------------------------
// Repair strategy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn majority_insert_is_rewritten_one_score_higher_everywhere() {
    let c = cluster(&["a", "b", "c"], vec![]).await;
    let key = Key::new("user:1");
    c.store("a").insert(&key, vec![fvs("name", "ada", 2)]).await;
    c.store("b").insert(&key, vec![fvs("name", "ada", 2)]).await;

    let repairer = Repairer::new(c.registry.clone());
    let report = repairer
        .repair(vec![item(&key, "name", "ada")])
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.inserts, 1);

    let field = Field::new("name");
    for host in ["a", "b", "c"] {
        let p = c.store(host).score(&key, &field).await;
        assert_eq!(
            p,
            Presence {
                inserted: true,
                present: true,
                score: 3
            },
            "replica {}",
            host
        );
        let got = c.store(host).select(&key, &field).await.unwrap();
        assert_eq!(got.value, b"ada".to_vec());
        assert!(c.registry.hint_contains(hash32(host.as_bytes()), &key).await);
    }
}

#[tokio::test]
async fn repair_writes_the_winning_value_not_the_callers() {
    let c = cluster(&["a", "b", "c"], vec![]).await;
    let key = Key::new("k");
    c.store("a").insert(&key, vec![fvs("f", "fresh", 7)]).await;
    c.store("b").insert(&key, vec![fvs("f", "fresh", 7)]).await;
    c.store("c").insert(&key, vec![fvs("f", "stale", 3)]).await;

    Repairer::new(c.registry.clone())
        .repair(vec![item(&key, "f", "stale")])
        .await
        .unwrap();

    let got = c.store("c").select(&key, &Field::new("f")).await.unwrap();
    assert_eq!(got.value, b"fresh".to_vec());
    assert_eq!(got.score, 8);
}

#[tokio::test]
async fn majority_deletion_is_propagated() {
    let c = cluster(&["a", "b", "c"], vec![]).await;
    let key = Key::new("k");
    for host in ["a", "b", "c"] {
        c.store(host).insert(&key, vec![fvs("f", "v", 1)]).await;
    }
    for host in ["a", "b"] {
        c.store(host)
            .delete(&key, vec![FieldValueScore::tombstone("f", 5)])
            .await;
    }

    let report = Repairer::new(c.registry.clone())
        .repair(vec![item(&key, "f", "v")])
        .await
        .unwrap();
    assert_eq!(report.deletes, 1);

    let field = Field::new("f");
    assert!(c.store("c").select(&key, &field).await.unwrap_err().is_not_found());
    assert_eq!(
        c.store("c").score(&key, &field).await,
        Presence {
            inserted: false,
            present: true,
            score: 6
        }
    );
}

#[tokio::test]
async fn lone_reporter_and_unknown_fields_are_left_alone() {
    let c = cluster(&["a", "b", "c"], vec![]).await;
    let key = Key::new("k");
    c.store("a").insert(&key, vec![fvs("solo", "v", 4)]).await;

    let report = Repairer::new(c.registry.clone())
        .repair(vec![item(&key, "solo", "v"), item(&key, "ghost", "")])
        .await
        .unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.below_quorum, 1);
    assert_eq!(report.ignored, 1);
    assert_eq!(report.inserts + report.deletes, 0);

    let p = c.store("b").score(&key, &Field::new("solo")).await;
    assert_eq!(p, Presence::absent());
}

#[tokio::test]
async fn unreachable_replica_errors_are_aggregated() {
    let dead: Arc<dyn Node> = Arc::new(RemoteNode::new(
        "http://127.0.0.1:9",
        RpcClient::new(Duration::from_millis(200)),
    ));
    let c = cluster(&["a", "b", "c"], vec![dead]).await;
    let key = Key::new("k");
    for host in ["a", "b", "c"] {
        c.store(host).insert(&key, vec![fvs("f", "v", 1)]).await;
    }

    let err = Repairer::new(c.registry.clone())
        .repair(vec![item(&key, "f", "v")])
        .await
        .unwrap_err();
    match err {
        TesselError::Node(msg) => {
            // One failure from the presence query, one from the rewrite.
            assert_eq!(msg.split("; ").count(), 2, "got: {}", msg);
        }
        other => panic!("Expected aggregated Node error, got: {:?}", other),
    }

    // Reachable replicas were still repaired.
    let got = c.store("c").select(&key, &Field::new("f")).await.unwrap();
    assert_eq!(got.score, 2);
}

// ---------------------------------------------------------------------------
// Repair queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_drops_jobs_when_full_and_drains_the_rest() {
    let c = cluster(&["a", "b", "c"], vec![]).await;
    let key = Key::new("k");
    c.store("a").insert(&key, vec![fvs("f", "v", 2)]).await;
    c.store("b").insert(&key, vec![fvs("f", "v", 2)]).await;

    let queue = RepairQueue::start(Arc::new(Repairer::new(c.registry.clone())), 1, 1);
    // Single-threaded test runtime: the worker cannot run before we yield.
    assert!(queue.schedule(vec![item(&key, "f", "v")]));
    assert!(!queue.schedule(vec![item(&key, "f", "v")]));
    assert!(queue.schedule(vec![]));

    let field = Field::new("f");
    let mut repaired = false;
    for _ in 0..200 {
        if c.store("c").score(&key, &field).await.score == 3 {
            repaired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(repaired, "queued repair never reached replica c");
    assert_eq!(queue.remaining_capacity(), 1);
}
