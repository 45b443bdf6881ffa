// crates/tessel-store/src/lib.rs
//
// tessel-store: Placement and storage primitives for Tessel.
//
// Provides the red-black balanced index that backs the consistent-hash ring,
// the ring itself (virtual nodes per host), the fixed-layout Bloom filter used
// as a per-peer membership hint, and the in-process bucketed storage engine
// that backs a single replica.

pub mod bloom;
pub mod bucket;
pub mod ring;
pub mod tree;

// Re-export key types for ergonomic access from downstream crates.
pub use bloom::BloomFilter;
pub use bucket::BucketStore;
pub use ring::HashRing;
pub use tree::RbTree;
