// crates/tessel-farm/src/farm.rs
//
// Farm: the quorum coordinator.
//
// Every operation follows one shape: ask the registry for a replica set,
// scatter the call across it, gather the typed replies, then apply the
// quorum predicate to (contacted, succeeded). Writes compare replies through
// the records accumulator and commit the key into the hints of the nodes that
// confirmed it. Selects merge replies through TupleSet union/difference so
// that divergence is discovered rather than rejected. Whenever quorum is met
// but some node failed, disagreed, or lags, the affected fields go to the
// repair queue and the caller is told the result is partial where a node
// actually failed.
//
// The coordinator imposes no deadline of its own; a node whose transport
// never answers holds the operation open.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use tessel_cluster::registry::NodeRegistry;
use tessel_cluster::scatter::{scatter, Gathered};
use tessel_core::quorum::consensus;
use tessel_core::{
    ChangeSet, Element, Field, FieldValueScore, Key, Node, Presence, Quorum, TesselError,
};
use tessel_sync::repair::lagging;
use tessel_sync::{RepairItem, RepairQueue, TupleSet};

use crate::accumulator::RecordsAccumulator;
use crate::error::FarmError;

// ---------------------------------------------------------------------------
// Reply extraction
// ---------------------------------------------------------------------------

/// A success payload that can be pulled out of an `Element`.
trait FromElement: Sized {
    fn from_element(element: Element) -> Result<Self, Element>;
}

macro_rules! from_element {
    ($ty:ty, $variant:ident) => {
        impl FromElement for $ty {
            fn from_element(element: Element) -> Result<Self, Element> {
                match element {
                    Element::$variant(v) => Ok(v),
                    other => Err(other),
                }
            }
        }
    };
}

from_element!(ChangeSet, ChangeSet);
from_element!(FieldValueScore, FieldValueScore);
from_element!(Vec<Key>, Keys);
from_element!(Vec<Field>, Fields);
from_element!(i64, Int64);
from_element!(Presence, Presence);

/// Gathered replies split into successes (tagged by node hash) and failures.
struct Replies<T> {
    values: Vec<(u32, T)>,
    errors: Vec<TesselError>,
}

async fn gather<T: FromElement>(mut gathered: Gathered, op: &str) -> Replies<T> {
    let mut values = Vec::with_capacity(gathered.total);
    let mut errors = Vec::new();
    while let Some((hash, element)) = gathered.recv().await {
        match T::from_element(element) {
            Ok(v) => values.push((hash, v)),
            Err(Element::Error(e)) => errors.push(e),
            Err(other) => errors.push(TesselError::Node(format!(
                "unexpected {} reply to {} from node {}",
                other.kind(),
                op,
                hash
            ))),
        }
    }
    Replies { values, errors }
}

fn join_errors(errors: &[TesselError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Quorum not met: not-found when every failure was an absence, otherwise
/// the aggregated node messages.
fn total_failure<T: Debug>(total: usize, returned: usize, errors: &[TesselError]) -> FarmError<T> {
    if !errors.is_empty() && errors.iter().all(TesselError::is_not_found) {
        return FarmError::NotFound;
    }
    let message = if errors.is_empty() {
        "no replies".to_string()
    } else {
        join_errors(errors)
    };
    FarmError::Total {
        total,
        returned,
        message,
    }
}

/// Apply the quorum predicate and classify the outcome.
fn settle<T: Debug>(
    op: &str,
    quorum: Quorum,
    total: usize,
    returned: usize,
    errors: &[TesselError],
    value: T,
) -> Result<T, FarmError<T>> {
    if !consensus(quorum, total, returned) {
        tracing::debug!("{} failed quorum {} ({}/{})", op, quorum, returned, total);
        return Err(total_failure(total, returned, errors));
    }
    if errors.is_empty() {
        return Ok(value);
    }
    Err(FarmError::Partial {
        value,
        total,
        returned,
        message: join_errors(errors),
    })
}

#[derive(Debug, Clone, Copy)]
enum WriteOp {
    Insert,
    Delete,
}

impl WriteOp {
    fn name(self) -> &'static str {
        match self {
            WriteOp::Insert => "insert",
            WriteOp::Delete => "delete",
        }
    }

    fn issue(self, node: &dyn Node, key: &Key, members: Vec<FieldValueScore>) -> tessel_core::ElementStream {
        match self {
            WriteOp::Insert => node.insert(key, members),
            WriteOp::Delete => node.delete(key, members),
        }
    }
}

// ---------------------------------------------------------------------------
// Farm
// ---------------------------------------------------------------------------

/// The quorum read/write engine over a node registry.
#[derive(Debug, Clone)]
pub struct Farm {
    registry: Arc<NodeRegistry>,
    repair: RepairQueue,
}

impl Farm {
    pub fn new(registry: Arc<NodeRegistry>, repair: RepairQueue) -> Self {
        Self { registry, repair }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Write `members` under `key`. Returns the replicas' common change set.
    pub async fn insert(
        &self,
        key: &Key,
        members: Vec<FieldValueScore>,
        quorum: Quorum,
    ) -> Result<ChangeSet, FarmError<ChangeSet>> {
        self.write(WriteOp::Insert, key, members, quorum).await
    }

    /// Tombstone `members` under `key`. Values are ignored.
    pub async fn delete(
        &self,
        key: &Key,
        members: Vec<FieldValueScore>,
        quorum: Quorum,
    ) -> Result<ChangeSet, FarmError<ChangeSet>> {
        self.write(WriteOp::Delete, key, members, quorum).await
    }

    async fn write(
        &self,
        op: WriteOp,
        key: &Key,
        members: Vec<FieldValueScore>,
        quorum: Quorum,
    ) -> Result<ChangeSet, FarmError<ChangeSet>> {
        let (nodes, commit) = self.registry.write(key, quorum).await;
        if nodes.is_empty() {
            return Err(FarmError::NotFound);
        }
        let total = nodes.len();
        let gathered = scatter(&nodes, |n| op.issue(n, key, members.clone()));
        let replies = gather::<ChangeSet>(gathered, op.name()).await;

        let mut accumulator = RecordsAccumulator::new();
        let mut confirmed = Vec::with_capacity(replies.values.len());
        for (hash, change_set) in replies.values {
            accumulator.add(change_set);
            confirmed.push(hash);
        }
        let returned = confirmed.len();

        if !consensus(quorum, total, returned) {
            tracing::debug!(
                "{} {} failed quorum {} ({}/{})",
                op.name(),
                key,
                quorum,
                returned,
                total
            );
            return Err(total_failure(total, returned, &replies.errors));
        }

        commit.commit(&confirmed).await;

        let mut problems = replies.errors;
        problems.extend(accumulator.error());
        if problems.is_empty() {
            return Ok(accumulator.value());
        }

        let message = join_errors(&problems);
        tracing::warn!(
            "Partial {} of {} ({}/{}): {}; scheduling repair",
            op.name(),
            key,
            returned,
            total,
            message
        );
        self.schedule_repair(
            members
                .into_iter()
                .map(|m| RepairItem::new(key.clone(), m.field, m.value))
                .collect(),
        );
        Err(FarmError::Partial {
            value: accumulator.value(),
            total,
            returned,
            message,
        })
    }

    /// Read one field under `quorum`, serving the highest-scored value a
    /// quorum of the contacted replicas report.
    ///
    /// Replicas that lack the field or trail the winning score are routed to
    /// repair. An explicit absence from a replica is an answer, not a failure.
    pub async fn select(
        &self,
        key: &Key,
        field: &Field,
        quorum: Quorum,
    ) -> Result<FieldValueScore, FarmError<FieldValueScore>> {
        let nodes = self.registry.read(key, quorum).await;
        if nodes.is_empty() {
            return Err(FarmError::NotFound);
        }
        let total = nodes.len();
        let replies =
            gather::<FieldValueScore>(scatter(&nodes, |n| n.select(key, field)), "select").await;

        let (absent, failures): (Vec<TesselError>, Vec<TesselError>) =
            replies.errors.into_iter().partition(|e| e.is_not_found());

        let mut sets: Vec<TupleSet> = replies
            .values
            .iter()
            .map(|(_, fvs)| TupleSet::from_members([fvs.clone()]))
            .collect();
        sets.extend(absent.iter().map(|_| TupleSet::new()));
        let returned = replies.values.len();

        let union = TupleSet::union(&sets, quorum, total);
        let Some(winner) = union.get(field) else {
            tracing::debug!("select {}/{} failed quorum {} ({}/{})", key, field, quorum, returned, total);
            if returned > 0 {
                // Under-replicated rather than absent; repair decides by majority.
                self.schedule_repair(vec![RepairItem::new(key.clone(), field.clone(), Vec::new())]);
            }
            let mut errors = failures;
            errors.extend(absent);
            return Err(total_failure(total, returned, &errors));
        };

        let scores: HashMap<u32, i64> = replies
            .values
            .iter()
            .map(|(hash, fvs)| (*hash, fvs.score))
            .collect();
        let behind = lagging(&scores, winner.score);
        let difference = TupleSet::difference(&sets, quorum, total);
        if !behind.is_empty() || !difference.is_empty() || !failures.is_empty() {
            tracing::warn!(
                "select {}/{} diverged ({} lagging, {} missing, {} failed); scheduling repair",
                key,
                field,
                behind.len(),
                absent.len(),
                failures.len()
            );
            self.schedule_repair(vec![RepairItem::new(
                key.clone(),
                field.clone(),
                winner.value.clone(),
            )]);
        }

        if failures.is_empty() {
            Ok(winner)
        } else {
            Err(FarmError::Partial {
                value: winner,
                total,
                returned,
                message: join_errors(&failures),
            })
        }
    }

    /// Every key held by any store node.
    pub async fn keys(&self) -> Result<Vec<Key>, FarmError<Vec<Key>>> {
        let nodes = self.registry.all().await;
        if nodes.is_empty() {
            return Err(FarmError::NotFound);
        }
        let total = nodes.len();
        let replies = gather::<Vec<Key>>(scatter(&nodes, |n| n.keys()), "keys").await;
        let returned = replies.values.len();
        let keys: BTreeSet<Key> = replies.values.into_iter().flat_map(|(_, k)| k).collect();
        settle(
            "keys",
            Quorum::Strong,
            total,
            returned,
            &replies.errors,
            keys.into_iter().collect(),
        )
    }

    /// Live field count under `key`: the largest count any replica reports.
    pub async fn size(&self, key: &Key) -> Result<i64, FarmError<i64>> {
        let nodes = self.registry.read(key, Quorum::Strong).await;
        if nodes.is_empty() {
            return Err(FarmError::NotFound);
        }
        let total = nodes.len();
        let replies = gather::<i64>(scatter(&nodes, |n| n.size(key)), "size").await;
        let returned = replies.values.len();
        let size = replies.values.iter().map(|(_, n)| *n).max().unwrap_or(0);
        settle("size", Quorum::Strong, total, returned, &replies.errors, size)
    }

    /// Live field names under `key` across all replicas.
    ///
    /// Fields some replicas list and others do not are routed to repair.
    pub async fn members(&self, key: &Key) -> Result<Vec<Field>, FarmError<Vec<Field>>> {
        let nodes = self.registry.read(key, Quorum::Strong).await;
        if nodes.is_empty() {
            return Err(FarmError::NotFound);
        }
        let total = nodes.len();
        let replies = gather::<Vec<Field>>(scatter(&nodes, |n| n.members(key)), "members").await;
        let returned = replies.values.len();

        let mut counts: HashMap<&Field, usize> = HashMap::new();
        for (_, fields) in &replies.values {
            for field in fields.iter().collect::<BTreeSet<_>>() {
                *counts.entry(field).or_default() += 1;
            }
        }
        let uneven: Vec<RepairItem> = counts
            .iter()
            .filter(|(_, n)| **n < returned)
            .map(|(f, _)| RepairItem::new(key.clone(), (*f).clone(), Vec::new()))
            .collect();
        if !uneven.is_empty() {
            tracing::warn!(
                "members {} diverged on {} field(s); scheduling repair",
                key,
                uneven.len()
            );
            self.schedule_repair(uneven);
        }

        let fields: BTreeSet<Field> = counts.into_keys().cloned().collect();
        settle(
            "members",
            Quorum::Strong,
            total,
            returned,
            &replies.errors,
            fields.into_iter().collect(),
        )
    }

    /// Presence of one field: the highest-scored replica that holds it, or
    /// an absent snapshot when none does.
    pub async fn score(&self, key: &Key, field: &Field) -> Result<Presence, FarmError<Presence>> {
        let nodes = self.registry.read(key, Quorum::Strong).await;
        if nodes.is_empty() {
            return Err(FarmError::NotFound);
        }
        let total = nodes.len();
        let replies = gather::<Presence>(scatter(&nodes, |n| n.score(key, field)), "score").await;
        let returned = replies.values.len();
        let best = replies
            .values
            .iter()
            .map(|(_, p)| *p)
            .filter(|p| p.present)
            .max_by_key(|p| (p.score, p.inserted))
            .or_else(|| replies.values.first().map(|(_, p)| *p))
            .unwrap_or_else(Presence::absent);
        settle("score", Quorum::Strong, total, returned, &replies.errors, best)
    }

    fn schedule_repair(&self, items: Vec<RepairItem>) {
        // A full queue logs and drops the job; the next read re-detects it.
        self.repair.schedule(items);
    }
}
