// crates/tessel-core/src/hash.rs
//
// MurmurHash3 helpers shared by key placement, node identity, and the
// membership hint filters.
//
// Every caller hashes in-memory byte slices, which cannot produce an I/O
// error, so the helpers return plain integers.

use std::io::Cursor;

/// Stable 32-bit hash (murmur3, seed 0) of a byte string.
pub fn hash32(bytes: &[u8]) -> u32 {
    murmur3::murmur3_32(&mut Cursor::new(bytes), 0).unwrap_or_default()
}

/// 128-bit murmur3 digest (x64 variant, seed 0) split into two 64-bit halves.
pub fn hash128(bytes: &[u8]) -> (u64, u64) {
    let digest = murmur3::murmur3_x64_128(&mut Cursor::new(bytes), 0).unwrap_or_default();
    (digest as u64, (digest >> 64) as u64)
}
