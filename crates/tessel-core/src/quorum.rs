// crates/tessel-core/src/quorum.rs
//
// Quorum predicate shared by the coordinator and the repair strategy.

use crate::types::Quorum;

/// Fraction of contacted nodes that must succeed under `Quorum::Consensus`.
pub const CONSENSUS_RATIO: f64 = 0.51;

/// Whether `returned` successes out of `total` contacted nodes satisfy `quorum`.
///
/// - `One`: at least one success.
/// - `Strong`: every contacted node succeeded.
/// - `Consensus`: `returned / total >= 0.51`; never met when `total` is 0.
pub fn consensus(quorum: Quorum, total: usize, returned: usize) -> bool {
    match quorum {
        Quorum::One => returned > 0,
        Quorum::Strong => returned == total,
        Quorum::Consensus => {
            total > 0 && (returned as f64) / (total as f64) >= CONSENSUS_RATIO
        }
    }
}

/// Smallest strict majority of `n` nodes.
pub fn majority(n: usize) -> usize {
    n / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_needs_any_success() {
        assert!(!consensus(Quorum::One, 3, 0));
        assert!(consensus(Quorum::One, 3, 1));
        assert!(consensus(Quorum::One, 1, 1));
    }

    #[test]
    fn strong_needs_everyone() {
        assert!(consensus(Quorum::Strong, 3, 3));
        assert!(!consensus(Quorum::Strong, 3, 2));
        assert!(consensus(Quorum::Strong, 0, 0));
    }

    #[test]
    fn consensus_needs_majority() {
        assert!(!consensus(Quorum::Consensus, 2, 1));
        assert!(consensus(Quorum::Consensus, 3, 2));
        assert!(!consensus(Quorum::Consensus, 4, 2));
        assert!(consensus(Quorum::Consensus, 4, 3));
        assert!(!consensus(Quorum::Consensus, 0, 0));
        // 51 of 100 is exactly at the threshold.
        assert!(consensus(Quorum::Consensus, 100, 51));
        assert!(!consensus(Quorum::Consensus, 100, 50));
    }

    #[test]
    fn majority_is_strict() {
        assert_eq!(majority(1), 1);
        assert_eq!(majority(2), 2);
        assert_eq!(majority(3), 2);
        assert_eq!(majority(4), 3);
    }
}
