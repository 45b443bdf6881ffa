// crates/tessel-farm/src/accumulator.rs
//
// Records accumulator for write replies.
//
// Replicas in sync answer a write with identical change sets; the first
// reply becomes the reference and any later reply that differs from it is
// recorded as variance. Comparison ignores field order within a change set.

use tessel_core::{ChangeSet, TesselError};

/// Collects per-node change sets and detects replication variance.
#[derive(Debug, Default)]
pub struct RecordsAccumulator {
    reference: Option<ChangeSet>,
    count: usize,
    variance: Vec<String>,
}

impl RecordsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one node's reply.
    pub fn add(&mut self, change_set: ChangeSet) {
        self.count += 1;
        match &self.reference {
            None => self.reference = Some(change_set),
            Some(reference) if *reference == change_set => {}
            Some(reference) => self.variance.push(format!(
                "{:?} != {:?}",
                reference.normalized(),
                change_set.normalized()
            )),
        }
    }

    /// Number of replies added.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The variance error, if any reply disagreed with the first.
    pub fn error(&self) -> Option<TesselError> {
        if self.variance.is_empty() {
            None
        } else {
            Some(TesselError::Variance(self.variance.join("; ")))
        }
    }

    /// The reference change set (empty when nothing was added).
    pub fn value(&self) -> ChangeSet {
        self.reference.clone().unwrap_or_default()
    }
}
