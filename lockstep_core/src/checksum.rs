//! State fingerprints for desync detection.
//!
//! Each admitted entity contributes a content-derived 64-bit hash; the world
//! checksum XORs every contribution into [`CHECKSUM_BASE`]. XOR is
//! commutative, so the result does not depend on iteration order.

use crate::fixed::Fix64;

/// Checksum of a world with no admitted entities.
pub const CHECKSUM_BASE: u64 = 3;

/// FNV-1a 64-bit hasher over little-endian encodings.
///
/// Unlike `std::hash::DefaultHasher`, the output is fixed by the algorithm
/// and identical on every platform and toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    /// Start a new hash.
    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    /// Feed bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    /// Feed a fixed-point value (its raw bits).
    pub fn write_fix64(&mut self, v: Fix64) {
        self.write_i64(v.to_bits());
    }

    /// Feed a length-prefixed string.
    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write(s.as_bytes());
    }

    /// Finalize and return the hash value.
    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds per-entity contributions into a world checksum.
pub fn combine<I>(contributions: I) -> u64
where
    I: IntoIterator<Item = u64>,
{
    contributions
        .into_iter()
        .fold(CHECKSUM_BASE, |acc, c| acc ^ c)
}
