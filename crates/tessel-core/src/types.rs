// crates/tessel-core/src/types.rs
//
// Record vocabulary shared by every layer: keys and fields, scored values,
// per-write change sets, per-node presence snapshots, and quorum levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TesselError;
use crate::hash::hash32;

/// Identifies a record. Opaque string; `hash()` drives sharding and ring placement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable 32-bit murmur3 hash of the key.
    pub fn hash(&self) -> u32 {
        hash32(self.0.as_bytes())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies a sub-field within a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Field(String);

impl Field {
    pub fn new(field: impl Into<String>) -> Self {
        Self(field.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> u32 {
        hash32(self.0.as_bytes())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A field value tagged with its logical write counter.
///
/// `score` is supplied by the caller and strictly increases per write; it is
/// the last-writer-wins tie breaker, never wall-clock time. Deletions carry an
/// empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValueScore {
    pub field: Field,
    #[serde(default)]
    pub value: Vec<u8>,
    pub score: i64,
}

impl FieldValueScore {
    pub fn new(field: impl Into<Field>, value: impl Into<Vec<u8>>, score: i64) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            score,
        }
    }

    /// A deletion marker for `field` at `score`.
    pub fn tombstone(field: impl Into<Field>, score: i64) -> Self {
        Self {
            field: field.into(),
            value: Vec::new(),
            score,
        }
    }
}

/// Per-field outcome of a write issued to one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub success: Vec<Field>,
    pub failure: Vec<Field>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.success.is_empty() && self.failure.is_empty()
    }

    /// Copy with both lists sorted and deduplicated.
    pub fn normalized(&self) -> ChangeSet {
        let mut success = self.success.clone();
        let mut failure = self.failure.clone();
        success.sort();
        success.dedup();
        failure.sort();
        failure.dedup();
        ChangeSet { success, failure }
    }
}

// Two change sets are equal when they report the same outcome per field,
// regardless of the order nodes listed them in.
impl PartialEq for ChangeSet {
    fn eq(&self, other: &Self) -> bool {
        let a = self.normalized();
        let b = other.normalized();
        a.success == b.success && a.failure == b.failure
    }
}

impl Eq for ChangeSet {}

/// What one node knows about a single field: the unit of repair comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// The node holds a live (inserted) record.
    pub inserted: bool,
    /// The node holds any record for the field, live or deleted.
    pub present: bool,
    pub score: i64,
}

impl Presence {
    /// Snapshot for a field the node has never seen.
    pub fn absent() -> Self {
        Self {
            inserted: false,
            present: false,
            score: -1,
        }
    }
}

/// Minimum agreeing-replica policy for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quorum {
    /// Any single success suffices.
    One,
    /// Every contacted node must succeed.
    Strong,
    /// A strict majority of contacted nodes must succeed.
    Consensus,
}

impl Default for Quorum {
    fn default() -> Self {
        Quorum::Consensus
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quorum::One => write!(f, "one"),
            Quorum::Strong => write!(f, "strong"),
            Quorum::Consensus => write!(f, "consensus"),
        }
    }
}

impl FromStr for Quorum {
    type Err = TesselError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "one" => Ok(Quorum::One),
            "strong" => Ok(Quorum::Strong),
            "consensus" => Ok(Quorum::Consensus),
            other => Err(TesselError::InvalidState(format!("unknown quorum '{}'", other))),
        }
    }
}
