// crates/tessel-sync/src/tuple_set.rs
//
// Per-node read replies as `field -> (score, value)` sets, and the quorum
// aware union/difference used to reconcile them.
//
// A field qualifies only when enough sets report it to meet the quorum
// against the number of replicas the caller expected to hear from, not the
// number that actually answered. Negative scores mean "no value" and are
// ignored outright.

use std::collections::{BTreeMap, HashMap};

use tessel_core::quorum::consensus;
use tessel_core::{Field, FieldValueScore, Quorum};

/// One node's view of a record: highest-scored value per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleSet {
    entries: BTreeMap<Field, (i64, Vec<u8>)>,
}

impl TupleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a node's reply; negative scores are dropped.
    pub fn from_members<I: IntoIterator<Item = FieldValueScore>>(members: I) -> Self {
        let mut set = Self::new();
        for member in members {
            set.insert(member);
        }
        set
    }

    /// Record `member`, keeping the higher score if the field is already set.
    pub fn insert(&mut self, member: FieldValueScore) {
        if member.score < 0 {
            return;
        }
        match self.entries.get(&member.field) {
            Some((score, _)) if *score >= member.score => {}
            _ => {
                self.entries
                    .insert(member.field, (member.score, member.value));
            }
        }
    }

    pub fn get(&self, field: &Field) -> Option<FieldValueScore> {
        self.entries.get(field).map(|(score, value)| FieldValueScore {
            field: field.clone(),
            value: value.clone(),
            score: *score,
        })
    }

    pub fn score(&self, field: &Field) -> Option<i64> {
        self.entries.get(field).map(|(score, _)| *score)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members in field order.
    pub fn members(&self) -> Vec<FieldValueScore> {
        self.entries
            .iter()
            .map(|(field, (score, value))| FieldValueScore {
                field: field.clone(),
                value: value.clone(),
                score: *score,
            })
            .collect()
    }

    /// The value to serve: for every field reported by a quorum of the
    /// `expected` replicas, the highest-scored candidate across `sets`.
    pub fn union(sets: &[TupleSet], quorum: Quorum, expected: usize) -> TupleSet {
        let tally = tally(sets);
        let entries = tally
            .into_iter()
            .filter(|(_, (count, _))| consensus(quorum, expected, *count))
            .map(|(field, (_, best))| (field, best))
            .collect();
        TupleSet { entries }
    }

    /// The fields to repair: reported by a quorum of the `expected` replicas
    /// but missing from at least one of `sets`. Carries the winning candidate.
    pub fn difference(sets: &[TupleSet], quorum: Quorum, expected: usize) -> TupleSet {
        let tally = tally(sets);
        let entries = tally
            .into_iter()
            .filter(|(_, (count, _))| *count < sets.len() && consensus(quorum, expected, *count))
            .map(|(field, (_, best))| (field, best))
            .collect();
        TupleSet { entries }
    }
}

/// Per field: how many sets report it, and the best `(score, value)` seen.
fn tally(sets: &[TupleSet]) -> HashMap<Field, (usize, (i64, Vec<u8>))> {
    let mut tally: HashMap<Field, (usize, (i64, Vec<u8>))> = HashMap::new();
    for set in sets {
        for (field, (score, value)) in &set.entries {
            let slot = tally
                .entry(field.clone())
                .or_insert_with(|| (0, (*score, value.clone())));
            slot.0 += 1;
            if *score > slot.1 .0 {
                slot.1 = (*score, value.clone());
            }
        }
    }
    tally
}
