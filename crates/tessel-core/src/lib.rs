// crates/tessel-core/src/lib.rs
//
// tessel-core: Core types, traits, and hashing primitives for the Tessel
// replicated key/field store.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the record vocabulary (keys, fields, scores, change sets), the
// per-node error taxonomy, the typed result union that flows over fan-in
// channels, and the capability traits implemented by node adapters and
// membership sources.

pub mod element;
pub mod error;
pub mod gossip;
pub mod hash;
pub mod quorum;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use tessel_core::Key;`

// Record types
pub use types::{ChangeSet, Field, FieldValueScore, Key, Presence, Quorum};

// Async result union
pub use element::{Element, ElementStream};

// Gossip payloads
pub use gossip::GossipEvent;

// Quorum predicate
pub use quorum::consensus;

// Error type
pub use error::TesselError;

// Traits
pub use traits::{EventHandler, MembershipSource, Node, PeerType};
