// crates/tessel-farm/src/error.rs

use std::fmt::Debug;

use thiserror::Error;

/// Outcome classification of a coordinated operation that did not fully succeed.
///
/// `Partial` still carries the operation's value: quorum was met, but some
/// nodes failed or disagreed, so callers decide whether to trust it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FarmError<T: Debug> {
    /// Quorum not met and every node that failed reported absence.
    #[error("Not found")]
    NotFound,

    /// Quorum not met.
    #[error("Quorum not met ({returned}/{total}): {message}")]
    Total {
        total: usize,
        returned: usize,
        message: String,
    },

    /// Quorum met despite node failures or replica variance.
    #[error("Partial success ({returned}/{total}): {message}")]
    Partial {
        value: T,
        total: usize,
        returned: usize,
        message: String,
    },
}

impl<T: Debug> FarmError<T> {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FarmError::NotFound)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, FarmError::Partial { .. })
    }

    /// The degraded-confidence value of a partial success.
    pub fn into_partial_value(self) -> Option<T> {
        match self {
            FarmError::Partial { value, .. } => Some(value),
            _ => None,
        }
    }
}
