// crates/tessel-sync/src/repair.rs
//
// Score-based replica repair.
//
// For each suspect (key, field) the repairer asks every replica of the key
// for its presence snapshot, derives a `Clue` (the winning state and score,
// and whether a majority of queried replicas corroborate it), and rewrites
// corroborated winners to the key's full write set at score + 1 so that every
// replica accepts the rewrite over whatever it currently holds.
//
// Repair is advisory: failures are aggregated and reported, never retried.
// A later read that still sees divergence schedules another pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tessel_cluster::nodes::first_element;
use tessel_cluster::registry::NodeRegistry;
use tessel_cluster::scatter::scatter;
use tessel_core::quorum::consensus;
use tessel_core::{Element, Field, FieldValueScore, Key, Node, Presence, Quorum, TesselError};

/// A field suspected to be inconsistent across replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairItem {
    pub key: Key,
    pub field: Field,
    /// The value the caller last saw; informational only.
    pub value: Vec<u8>,
}

impl RepairItem {
    pub fn new(key: Key, field: Field, value: Vec<u8>) -> Self {
        Self { key, field, value }
    }
}

/// Repair decision for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clue {
    pub key: Key,
    pub field: Field,
    pub value: Vec<u8>,
    /// No queried replica reported the field; nothing to repair against.
    pub ignore: bool,
    /// The winning state is a live insert (otherwise a deletion).
    pub insert: bool,
    /// Highest score among replicas reporting the field.
    pub score: i64,
    /// A majority of queried replicas report the field.
    pub quorum: bool,
}

impl Clue {
    /// Derive the clue for `item` from the snapshots of the replicas that
    /// answered, out of `queried` replicas asked.
    pub fn from_presence(item: &RepairItem, queried: usize, replies: &[Presence]) -> Clue {
        let present: Vec<&Presence> = replies.iter().filter(|p| p.present).collect();
        let Some(score) = present.iter().map(|p| p.score).max() else {
            return Clue {
                key: item.key.clone(),
                field: item.field.clone(),
                value: item.value.clone(),
                ignore: true,
                insert: false,
                score: -1,
                quorum: false,
            };
        };
        let insert = present.iter().any(|p| p.score == score && p.inserted);
        Clue {
            key: item.key.clone(),
            field: item.field.clone(),
            value: item.value.clone(),
            ignore: false,
            insert,
            score,
            quorum: consensus(Quorum::Consensus, queried, present.len()),
        }
    }
}

/// Outcome counters for one repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub examined: usize,
    pub ignored: usize,
    pub below_quorum: usize,
    pub inserts: usize,
    pub deletes: usize,
}

#[derive(Default)]
struct Batch {
    inserts: Vec<FieldValueScore>,
    deletes: Vec<FieldValueScore>,
}

/// Runs repair passes against the registry's current view.
#[derive(Debug, Clone)]
pub struct Repairer {
    registry: Arc<NodeRegistry>,
}

impl Repairer {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Repair every item. Returns the pass counters, or the joined messages
    /// of every query and write failure encountered.
    pub async fn repair(&self, items: Vec<RepairItem>) -> Result<RepairReport, TesselError> {
        let mut report = RepairReport::default();
        let mut errors: Vec<String> = Vec::new();
        let mut batches: BTreeMap<Key, Batch> = BTreeMap::new();

        for item in &items {
            report.examined += 1;
            let (clue, winners) = self.investigate(item, &mut errors).await;
            if clue.ignore {
                report.ignored += 1;
                tracing::debug!("Repair of {}/{} ignored: no replica holds it", item.key, item.field);
                continue;
            }
            if !clue.quorum {
                report.below_quorum += 1;
                tracing::debug!(
                    "Repair of {}/{} skipped: score {} lacks a majority",
                    item.key,
                    item.field,
                    clue.score
                );
                continue;
            }

            let batch = batches.entry(clue.key.clone()).or_default();
            if clue.insert {
                match fetch_value(&clue, &winners).await {
                    Ok(value) => {
                        batch
                            .inserts
                            .push(FieldValueScore::new(clue.field.clone(), value, clue.score + 1));
                    }
                    Err(e) => errors.push(e.to_string()),
                }
            } else {
                batch
                    .deletes
                    .push(FieldValueScore::tombstone(clue.field.clone(), clue.score + 1));
            }
        }

        for (key, batch) in batches {
            if !batch.inserts.is_empty() {
                report.inserts += batch.inserts.len();
                self.rewrite(&key, batch.inserts, true, &mut errors).await;
            }
            if !batch.deletes.is_empty() {
                report.deletes += batch.deletes.len();
                self.rewrite(&key, batch.deletes, false, &mut errors).await;
            }
        }

        if errors.is_empty() {
            tracing::debug!("Repair pass complete: {:?}", report);
            Ok(report)
        } else {
            tracing::warn!("Repair pass finished with {} failure(s): {:?}", errors.len(), report);
            Err(TesselError::Node(errors.join("; ")))
        }
    }

    /// Query every replica of the item's key and derive its clue, plus the
    /// replicas holding the winning state.
    async fn investigate(
        &self,
        item: &RepairItem,
        errors: &mut Vec<String>,
    ) -> (Clue, Vec<Arc<dyn Node>>) {
        let nodes = self.registry.read(&item.key, Quorum::Strong).await;
        let mut gathered = scatter(&nodes, |n| n.score(&item.key, &item.field));

        let mut replies: Vec<(u32, Presence)> = Vec::with_capacity(nodes.len());
        while let Some((hash, element)) = gathered.recv().await {
            match element {
                Element::Presence(p) => replies.push((hash, p)),
                Element::Error(e) => errors.push(e.to_string()),
                other => errors.push(format!("unexpected {} reply to score", other.kind())),
            }
        }

        let presences: Vec<Presence> = replies.iter().map(|(_, p)| *p).collect();
        let clue = Clue::from_presence(item, nodes.len(), &presences);
        let winners = replies
            .iter()
            .filter(|(_, p)| p.present && p.score == clue.score && p.inserted == clue.insert)
            .filter_map(|(hash, _)| nodes.iter().find(|n| n.hash() == *hash).cloned())
            .collect();
        (clue, winners)
    }

    async fn rewrite(
        &self,
        key: &Key,
        members: Vec<FieldValueScore>,
        insert: bool,
        errors: &mut Vec<String>,
    ) {
        let (nodes, commit) = self.registry.write(key, Quorum::Strong).await;
        let mut gathered = scatter(&nodes, |n| {
            if insert {
                n.insert(key, members.clone())
            } else {
                n.delete(key, members.clone())
            }
        });

        let mut succeeded = Vec::with_capacity(nodes.len());
        while let Some((hash, element)) = gathered.recv().await {
            match element {
                Element::ChangeSet(_) => succeeded.push(hash),
                Element::Error(e) => {
                    tracing::warn!("Repair write for {} failed on node {}: {}", key, hash, e);
                    errors.push(e.to_string());
                }
                other => errors.push(format!("unexpected {} reply to repair write", other.kind())),
            }
        }
        if insert {
            commit.commit(&succeeded).await;
        }
    }
}

/// Read the winning value from the first winner that serves it.
async fn fetch_value(clue: &Clue, winners: &[Arc<dyn Node>]) -> Result<Vec<u8>, TesselError> {
    let mut last_error = None;
    for node in winners {
        match first_element(node.select(&clue.key, &clue.field)).await {
            Ok(Element::FieldValueScore(fvs)) => return Ok(fvs.value),
            Ok(Element::Error(e)) | Err(e) => {
                tracing::debug!(
                    "Winner {} could not serve {}/{}: {}",
                    node.host(),
                    clue.key,
                    clue.field,
                    e
                );
                last_error = Some(e);
            }
            Ok(other) => {
                last_error = Some(TesselError::Node(format!(
                    "unexpected {} reply to select",
                    other.kind()
                )))
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        TesselError::Node(format!("no replica serves {}/{}", clue.key, clue.field))
    }))
}

/// Hashes of the nodes whose reported score trails `winner`, sorted.
pub fn lagging(replies: &HashMap<u32, i64>, winner: i64) -> Vec<u32> {
    let mut hashes: Vec<u32> = replies
        .iter()
        .filter(|(_, score)| **score < winner)
        .map(|(hash, _)| *hash)
        .collect();
    hashes.sort_unstable();
    hashes
}
