// crates/tessel-farm/src/lib.rs
//
// tessel-farm: The quorum read/write coordinator for Tessel.
//
// The farm turns one logical operation into a fan-out across the replica set
// the node registry selects, gathers the typed replies, applies the quorum
// predicate, and classifies the outcome as success, partial success (quorum
// met despite node failures or divergence, with repair scheduled), or total
// failure.

pub mod accumulator;
pub mod error;
pub mod farm;

// Re-export key types for ergonomic access from downstream crates.
pub use accumulator::RecordsAccumulator;
pub use error::FarmError;
pub use farm::Farm;
