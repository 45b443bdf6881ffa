// crates/tessel-sync/src/lib.rs
//
// tessel-sync: Replica reconciliation for Tessel.
//
// TupleSets merge per-node read replies into the value served to a caller
// (union) and the fields that lag on some replicas (difference). The repair
// strategy re-queries presence for suspect fields, decides a winner by
// majority and highest score, and rewrites it to the full write set. Repair
// jobs run on a bounded background queue.

pub mod queue;
pub mod repair;
pub mod tuple_set;

// Re-export key types for ergonomic access from downstream crates.
pub use queue::RepairQueue;
pub use repair::{Clue, RepairItem, RepairReport, Repairer};
pub use tuple_set::TupleSet;
