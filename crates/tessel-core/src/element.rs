// crates/tessel-core/src/element.rs
//
// The typed result union carried over node reply channels.
//
// Every node operation answers with a stream of `Element`s so that
// heterogeneous operations (insert vs. select vs. keys) share one fan-in
// path in the coordinator. Consumers match exhaustively on the variant they
// expect and treat anything else as a protocol error.

use tokio::sync::mpsc;

use crate::error::TesselError;
use crate::types::{ChangeSet, Field, FieldValueScore, Key, Presence};

/// A single asynchronous result from a node call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Error(TesselError),
    ChangeSet(ChangeSet),
    FieldValueScore(FieldValueScore),
    Keys(Vec<Key>),
    Fields(Vec<Field>),
    Int64(i64),
    Presence(Presence),
}

/// Receiving end of a node call. The node closes it once it is done.
pub type ElementStream = mpsc::Receiver<Element>;

impl Element {
    /// Variant name, used in "unexpected element" diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Error(_) => "error",
            Element::ChangeSet(_) => "change_set",
            Element::FieldValueScore(_) => "field_value_score",
            Element::Keys(_) => "keys",
            Element::Fields(_) => "fields",
            Element::Int64(_) => "int64",
            Element::Presence(_) => "presence",
        }
    }
}

impl From<Result<ChangeSet, TesselError>> for Element {
    fn from(r: Result<ChangeSet, TesselError>) -> Self {
        r.map(Element::ChangeSet).unwrap_or_else(Element::Error)
    }
}

impl From<Result<FieldValueScore, TesselError>> for Element {
    fn from(r: Result<FieldValueScore, TesselError>) -> Self {
        r.map(Element::FieldValueScore).unwrap_or_else(Element::Error)
    }
}

impl From<Result<Vec<Key>, TesselError>> for Element {
    fn from(r: Result<Vec<Key>, TesselError>) -> Self {
        r.map(Element::Keys).unwrap_or_else(Element::Error)
    }
}

impl From<Result<Vec<Field>, TesselError>> for Element {
    fn from(r: Result<Vec<Field>, TesselError>) -> Self {
        r.map(Element::Fields).unwrap_or_else(Element::Error)
    }
}

impl From<Result<i64, TesselError>> for Element {
    fn from(r: Result<i64, TesselError>) -> Self {
        r.map(Element::Int64).unwrap_or_else(Element::Error)
    }
}

impl From<Result<Presence, TesselError>> for Element {
    fn from(r: Result<Presence, TesselError>) -> Self {
        r.map(Element::Presence).unwrap_or_else(Element::Error)
    }
}
