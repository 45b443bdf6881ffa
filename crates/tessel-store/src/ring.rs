// crates/tessel-store/src/ring.rs
//
// Consistent-hash ring over the red-black placement index.
//
// Each host occupies `replication_factor` virtual positions: the murmur3 hash
// of `"{host}{i}"` for i in [0, factor). A key is placed by hashing it and
// walking clockwise for the requested number of distinct hosts. The same
// host set and factor always produce the same placement on every node.

use std::collections::BTreeSet;

use tessel_core::hash::hash32;
use tessel_core::Key;

use crate::tree::RbTree;

/// Hash ring mapping keys to ordered replica host lists.
#[derive(Debug, Clone)]
pub struct HashRing {
    replication_factor: usize,
    tree: RbTree,
    hosts: BTreeSet<String>,
}

impl HashRing {
    /// Create an empty ring.
    ///
    /// # Panics
    ///
    /// Panics if `replication_factor` is 0.
    pub fn new(replication_factor: usize) -> Self {
        assert!(replication_factor > 0, "replication_factor must be > 0");
        Self {
            replication_factor,
            tree: RbTree::new(),
            hosts: BTreeSet::new(),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Add `host`'s virtual positions.
    ///
    /// Returns `false` if the host is already on the ring, or if any of its
    /// positions collided with an existing one (the colliding position keeps
    /// its current owner; the host is still added).
    pub fn add(&mut self, host: &str) -> bool {
        if self.hosts.contains(host) {
            return false;
        }
        let mut all_inserted = true;
        for position in self.positions(host) {
            all_inserted &= self.tree.insert(position, host);
        }
        self.hosts.insert(host.to_string());
        all_inserted
    }

    /// Remove `host`'s virtual positions.
    ///
    /// Positions owned by another host after a collision are left alone.
    /// Returns `false` if the host was not on the ring or a position could
    /// not be removed.
    pub fn remove(&mut self, host: &str) -> bool {
        if !self.hosts.remove(host) {
            return false;
        }
        let mut all_removed = true;
        for position in self.positions(host) {
            if self.tree.search(position) == Some(host) {
                all_removed &= self.tree.delete(position);
            } else {
                all_removed = false;
            }
        }
        all_removed
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Up to `n` distinct hosts responsible for `key`, in ring order.
    pub fn lookup_n(&self, key: &Key, n: usize) -> Vec<String> {
        self.tree.lookup_n_unique_at(n, i64::from(key.hash()))
    }

    /// Every host on the ring, sorted.
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.iter().cloned().collect()
    }

    /// Number of distinct hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Number of virtual positions currently on the ring.
    pub fn positions_len(&self) -> usize {
        self.tree.len()
    }

    fn positions(&self, host: &str) -> Vec<i64> {
        (0..self.replication_factor)
            .map(|i| i64::from(hash32(format!("{}{}", host, i).as_bytes())))
            .collect()
    }
}
