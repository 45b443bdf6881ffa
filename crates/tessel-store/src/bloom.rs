// crates/tessel-store/src/bloom.rs
//
// Fixed-capacity Bloom filter used as a per-peer membership hint.
//
// One filter per known peer records which keys that peer is believed to hold.
// Filters are merged with bitwise OR when gossip delivers a peer's view, so
// two filters are only compatible when they share capacity and hash count.
// Bit positions come from two 128-bit murmur3 digests combined with an
// offset-dependent stride, so every node computes the same positions for the
// same key.
//
// Wire layout (all little-endian):
// ```text
// [8 bytes: capacity u64]
// [8 bytes: recursions u64]
// [ceil(capacity / 64) * 8 bytes: bitset words u64]
// ```

use tessel_core::hash::hash128;
use tessel_core::TesselError;

const HEADER_SIZE: usize = 16;

/// Bloom filter over byte strings with a stable binary layout.
///
/// False positives are possible; false negatives are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    capacity: u64,
    recursions: u64,
    words: Vec<u64>,
}

impl BloomFilter {
    /// Create an empty filter with `capacity` bits and `recursions` hash
    /// positions per item.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `recursions` is 0.
    pub fn new(capacity: u64, recursions: u64) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(recursions > 0, "recursions must be > 0");
        Self {
            capacity,
            recursions,
            words: vec![0; word_count(capacity)],
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn recursions(&self) -> u64 {
        self.recursions
    }

    /// Record `item` in the filter.
    pub fn add(&mut self, item: &[u8]) {
        for bit in self.locations(item) {
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    /// Whether `item` may have been added.
    pub fn contains(&self, item: &[u8]) -> bool {
        self.locations(item)
            .all(|bit| self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    /// OR `other` into this filter. Returns whether any bit changed.
    ///
    /// Fails without modifying `self` if the two filters differ in capacity
    /// or recursion count.
    pub fn union(&mut self, other: &BloomFilter) -> Result<bool, TesselError> {
        if self.capacity != other.capacity || self.recursions != other.recursions {
            return Err(TesselError::Hint(format!(
                "cannot union filter ({}, {}) with ({}, {})",
                self.capacity, self.recursions, other.capacity, other.recursions
            )));
        }
        let mut changed = false;
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            let merged = *mine | theirs;
            changed |= merged != *mine;
            *mine = merged;
        }
        Ok(changed)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Serialize to the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.words.len() * 8);
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf.extend_from_slice(&self.recursions.to_le_bytes());
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Deserialize from the wire layout.
    ///
    /// Rejects short input, zero parameters, and a bitset whose length does
    /// not match the declared capacity.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TesselError> {
        if data.len() < HEADER_SIZE {
            return Err(TesselError::Hint(format!(
                "hint data too short: expected at least {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        let capacity = read_u64(&data[0..8])?;
        let recursions = read_u64(&data[8..16])?;
        if capacity == 0 || recursions == 0 {
            return Err(TesselError::Hint(format!(
                "invalid hint parameters: capacity {}, recursions {}",
                capacity, recursions
            )));
        }

        let body = &data[HEADER_SIZE..];
        let expected = capacity.div_ceil(64) * 8;
        if body.len() as u64 != expected {
            return Err(TesselError::Hint(format!(
                "hint bitset length mismatch: expected {} bytes, got {}",
                expected,
                body.len()
            )));
        }
        let words = body
            .chunks_exact(8)
            .map(read_u64)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            capacity,
            recursions,
            words,
        })
    }

    /// Bit positions for `item`. The iterator owns copies of the filter
    /// parameters so callers may mutate the bitset while walking it.
    fn locations(&self, item: &[u8]) -> impl Iterator<Item = u64> {
        let capacity = self.capacity;
        let (a, b) = hash128(item);
        let mut salted = Vec::with_capacity(item.len() + 1);
        salted.extend_from_slice(item);
        salted.push(1);
        let (c, d) = hash128(&salted);
        let h = [a, b, c, d];
        (0..self.recursions).map(move |i| {
            let base = h[(i % 2) as usize];
            let stride = h[2 + (((i + i % 2) % 4) / 2) as usize];
            base.wrapping_add(i.wrapping_mul(stride)) % capacity
        })
    }
}

fn word_count(capacity: u64) -> usize {
    capacity.div_ceil(64) as usize
}

fn read_u64(bytes: &[u8]) -> Result<u64, TesselError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|e| TesselError::Hint(format!("failed to read u64: {}", e)))?;
    Ok(u64::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(items: &[&str]) -> BloomFilter {
        let mut bf = BloomFilter::new(4096, 4);
        for item in items {
            bf.add(item.as_bytes());
        }
        bf
    }

    #[test]
    fn fresh_filter_contains_nothing() {
        let bf = BloomFilter::new(1024, 3);
        for i in 0..100 {
            assert!(!bf.contains(format!("key-{}", i).as_bytes()));
        }
        assert_eq!(bf.count_ones(), 0);
    }

    #[test]
    fn add_sets_at_most_one_bit_per_recursion() {
        let mut bf = BloomFilter::new(4096, 4);
        bf.add(b"user:1");
        let first = bf.count_ones();
        assert!((1..=4).contains(&first), "set {} bits", first);
        assert!(bf.contains(b"user:1"));

        // Re-adding the same item touches the same positions.
        bf.add(b"user:1");
        assert_eq!(bf.count_ones(), first);
    }

    #[test]
    fn no_false_negatives() {
        let items: Vec<String> = (0..500).map(|i| format!("key-{}", i)).collect();
        let mut bf = BloomFilter::new(8192, 4);
        for item in &items {
            bf.add(item.as_bytes());
        }
        for item in &items {
            assert!(bf.contains(item.as_bytes()), "False negative for {}", item);
        }
    }

    #[test]
    fn overfilled_filter_keeps_inserted_items() {
        // Far more items than bits: saturates, never forgets.
        let mut bf = BloomFilter::new(64, 3);
        let items: Vec<String> = (0..1000).map(|i| format!("k{}", i)).collect();
        for item in &items {
            bf.add(item.as_bytes());
        }
        assert!(items.iter().all(|i| bf.contains(i.as_bytes())));
        assert!(bf.count_ones() <= 64);
    }

    #[test]
    fn union_is_commutative_and_idempotent() {
        let a = filled(&["x", "y"]);
        let b = filled(&["y", "z"]);

        let mut ab = a.clone();
        assert!(ab.union(&b).unwrap());
        let mut ba = b.clone();
        assert!(ba.union(&a).unwrap());
        assert_eq!(ab, ba);

        let mut self_union = a.clone();
        assert!(!self_union.union(&a).unwrap());
        assert_eq!(self_union, a);

        for item in ["x", "y", "z"] {
            assert!(ab.contains(item.as_bytes()));
        }
    }

    #[test]
    fn union_rejects_mismatched_layout() {
        let mut a = BloomFilter::new(1024, 4);
        let b = BloomFilter::new(2048, 4);
        let c = BloomFilter::new(1024, 5);
        assert!(matches!(a.union(&b), Err(TesselError::Hint(_))));
        assert!(matches!(a.union(&c), Err(TesselError::Hint(_))));
    }

    #[test]
    fn wire_layout_is_little_endian() {
        let mut bf = BloomFilter::new(100, 2);
        bf.add(b"k");
        let bytes = bf.to_bytes();
        assert_eq!(bytes.len(), 16 + 2 * 8);
        assert_eq!(&bytes[0..8], &100u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &2u64.to_le_bytes());

        let restored = BloomFilter::from_bytes(&bytes).unwrap();
        assert_eq!(restored, bf);
        assert!(restored.contains(b"k"));
    }

    #[test]
    fn from_bytes_too_short_returns_error() {
        let err = BloomFilter::from_bytes(&[0u8; 10]).unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("too short"), "got: {}", msg);
    }

    #[test]
    fn from_bytes_rejects_truncated_bitset() {
        let mut bytes = BloomFilter::new(256, 3).to_bytes();
        bytes.truncate(bytes.len() - 8);
        assert!(BloomFilter::from_bytes(&bytes).is_err());
    }

    #[test]
    fn from_bytes_rejects_zero_capacity() {
        let mut bytes = vec![0u8; 16];
        bytes[8] = 3;
        assert!(BloomFilter::from_bytes(&bytes).is_err());
    }
}
