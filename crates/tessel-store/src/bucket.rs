// crates/tessel-store/src/bucket.rs
//
// In-process bucketed storage engine backing a single replica.
//
// Records are `key -> field -> {value, score, inserted}`, sharded into a fixed
// number of buckets by key hash, each bucket behind its own async RwLock so
// writes to unrelated keys do not contend. Conflicts resolve last-writer-wins
// by score, with ties going to an insert over a deletion. Deletions leave a
// tombstone so that a late, lower-scored insert cannot resurrect the field.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::trace;

use tessel_core::{ChangeSet, Field, FieldValueScore, Key, Presence, TesselError};

/// A stored field record; `inserted == false` marks a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    value: Vec<u8>,
    score: i64,
    inserted: bool,
}

type Bucket = HashMap<Key, HashMap<Field, Record>>;

/// Bucketed in-memory store with last-writer-wins field semantics.
#[derive(Debug)]
pub struct BucketStore {
    buckets: Vec<RwLock<Bucket>>,
}

impl BucketStore {
    /// Create a store with `buckets` independent buckets.
    ///
    /// # Panics
    ///
    /// Panics if `buckets` is 0.
    pub fn new(buckets: usize) -> Self {
        assert!(buckets > 0, "buckets must be > 0");
        Self {
            buckets: (0..buckets).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn bucket(&self, key: &Key) -> &RwLock<Bucket> {
        &self.buckets[key.hash() as usize % self.buckets.len()]
    }

    /// Write field values. A member succeeds when the field is absent, its
    /// stored score is lower, or the scores tie and the stored record is a
    /// tombstone.
    pub async fn insert(&self, key: &Key, members: Vec<FieldValueScore>) -> ChangeSet {
        let mut bucket = self.bucket(key).write().await;
        let fields = bucket.entry(key.clone()).or_default();
        let mut changes = ChangeSet::new();
        for member in members {
            let wins = match fields.get(&member.field) {
                None => true,
                Some(existing) => {
                    existing.score < member.score
                        || (existing.score == member.score && !existing.inserted)
                }
            };
            if wins {
                fields.insert(
                    member.field.clone(),
                    Record {
                        value: member.value,
                        score: member.score,
                        inserted: true,
                    },
                );
                changes.success.push(member.field);
            } else {
                changes.failure.push(member.field);
            }
        }
        trace!(
            "insert {}: {} ok, {} rejected",
            key,
            changes.success.len(),
            changes.failure.len()
        );
        changes
    }

    /// Tombstone fields. A member succeeds when the field is absent or its
    /// stored score is strictly lower. Values are ignored.
    pub async fn delete(&self, key: &Key, members: Vec<FieldValueScore>) -> ChangeSet {
        let mut bucket = self.bucket(key).write().await;
        let fields = bucket.entry(key.clone()).or_default();
        let mut changes = ChangeSet::new();
        for member in members {
            let wins = fields
                .get(&member.field)
                .map_or(true, |existing| existing.score < member.score);
            if wins {
                fields.insert(
                    member.field.clone(),
                    Record {
                        value: Vec::new(),
                        score: member.score,
                        inserted: false,
                    },
                );
                changes.success.push(member.field);
            } else {
                changes.failure.push(member.field);
            }
        }
        trace!(
            "delete {}: {} ok, {} rejected",
            key,
            changes.success.len(),
            changes.failure.len()
        );
        changes
    }

    /// The live record for `field`, or `NotFound`.
    pub async fn select(&self, key: &Key, field: &Field) -> Result<FieldValueScore, TesselError> {
        let bucket = self.bucket(key).read().await;
        match bucket.get(key).and_then(|fields| fields.get(field)) {
            Some(record) if record.inserted => Ok(FieldValueScore {
                field: field.clone(),
                value: record.value.clone(),
                score: record.score,
            }),
            _ => Err(TesselError::NotFound(format!("{}/{}", key, field))),
        }
    }

    /// Keys holding at least one live field, sorted.
    pub async fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        for bucket in &self.buckets {
            let bucket = bucket.read().await;
            keys.extend(
                bucket
                    .iter()
                    .filter(|(_, fields)| fields.values().any(|r| r.inserted))
                    .map(|(key, _)| key.clone()),
            );
        }
        keys.sort();
        keys
    }

    /// Number of live fields under `key`.
    pub async fn size(&self, key: &Key) -> i64 {
        let bucket = self.bucket(key).read().await;
        bucket
            .get(key)
            .map_or(0, |fields| fields.values().filter(|r| r.inserted).count() as i64)
    }

    /// Live field names under `key`, sorted.
    pub async fn members(&self, key: &Key) -> Vec<Field> {
        let bucket = self.bucket(key).read().await;
        let mut fields: Vec<Field> = bucket
            .get(key)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, r)| r.inserted)
                    .map(|(f, _)| f.clone())
                    .collect()
            })
            .unwrap_or_default();
        fields.sort();
        fields
    }

    /// Presence snapshot for `field`, live or tombstoned.
    pub async fn score(&self, key: &Key, field: &Field) -> Presence {
        let bucket = self.bucket(key).read().await;
        match bucket.get(key).and_then(|fields| fields.get(field)) {
            Some(record) => Presence {
                inserted: record.inserted,
                present: true,
                score: record.score,
            },
            None => Presence::absent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fvs(field: &str, value: &str, score: i64) -> FieldValueScore {
        FieldValueScore::new(field, value.as_bytes().to_vec(), score)
    }

    #[tokio::test]
    async fn insert_then_select() {
        let store = BucketStore::new(4);
        let key = Key::new("user");
        let cs = store.insert(&key, vec![fvs("name", "ada", 1)]).await;
        assert_eq!(cs.success, vec![Field::new("name")]);
        assert!(cs.failure.is_empty());

        let got = store.select(&key, &Field::new("name")).await.unwrap();
        assert_eq!(got.value, b"ada".to_vec());
        assert_eq!(got.score, 1);
    }

    #[tokio::test]
    async fn lower_score_insert_is_rejected() {
        let store = BucketStore::new(4);
        let key = Key::new("user");
        store.insert(&key, vec![fvs("name", "new", 5)]).await;
        let cs = store.insert(&key, vec![fvs("name", "old", 3)]).await;
        assert_eq!(cs.failure, vec![Field::new("name")]);
        let got = store.select(&key, &Field::new("name")).await.unwrap();
        assert_eq!(got.value, b"new".to_vec());

        // Equal score over a live record also loses.
        let cs = store.insert(&key, vec![fvs("name", "tie", 5)]).await;
        assert_eq!(cs.failure, vec![Field::new("name")]);
    }

    #[tokio::test]
    async fn delete_leaves_tombstone() {
        let store = BucketStore::new(4);
        let key = Key::new("user");
        let field = Field::new("name");
        store.insert(&key, vec![fvs("name", "ada", 1)]).await;
        let cs = store.delete(&key, vec![FieldValueScore::tombstone("name", 2)]).await;
        assert_eq!(cs.success, vec![field.clone()]);

        assert!(store.select(&key, &field).await.unwrap_err().is_not_found());
        assert_eq!(store.size(&key).await, 0);
        assert!(store.keys().await.is_empty());

        let p = store.score(&key, &field).await;
        assert_eq!(
            p,
            Presence {
                inserted: false,
                present: true,
                score: 2
            }
        );

        // A late insert at a lower score cannot resurrect the field.
        let cs = store.insert(&key, vec![fvs("name", "ghost", 1)]).await;
        assert_eq!(cs.failure, vec![field.clone()]);
        // The same score wins over a tombstone.
        let cs = store.insert(&key, vec![fvs("name", "back", 2)]).await;
        assert_eq!(cs.success, vec![field]);
    }

    #[tokio::test]
    async fn delete_requires_strictly_higher_score() {
        let store = BucketStore::new(1);
        let key = Key::new("k");
        store.insert(&key, vec![fvs("f", "v", 4)]).await;
        let cs = store.delete(&key, vec![FieldValueScore::tombstone("f", 4)]).await;
        assert_eq!(cs.failure, vec![Field::new("f")]);
        let cs = store.delete(&key, vec![FieldValueScore::tombstone("g", 0)]).await;
        assert_eq!(cs.success, vec![Field::new("g")]);
    }

    #[tokio::test]
    async fn metadata_queries_see_live_fields_only() {
        let store = BucketStore::new(8);
        let a = Key::new("a");
        let b = Key::new("b");
        store
            .insert(&a, vec![fvs("x", "1", 1), fvs("y", "2", 1), fvs("z", "3", 1)])
            .await;
        store.insert(&b, vec![fvs("x", "1", 1)]).await;
        store.delete(&a, vec![FieldValueScore::tombstone("y", 2)]).await;

        assert_eq!(store.keys().await, vec![a.clone(), b.clone()]);
        assert_eq!(store.size(&a).await, 2);
        assert_eq!(store.members(&a).await, vec![Field::new("x"), Field::new("z")]);
        assert_eq!(store.size(&Key::new("missing")).await, 0);
        assert!(store.members(&Key::new("missing")).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_field_scores_as_absent() {
        let store = BucketStore::new(2);
        let p = store.score(&Key::new("k"), &Field::new("f")).await;
        assert_eq!(p, Presence::absent());
    }
}
