//! Deterministic random source shared by every replica.
//!
//! Uses a ChaCha8 stream seeded from a single 64-bit value. The stream and
//! the seed expansion are integer-only and value-stable across platforms,
//! so two replicas seeded alike draw identical sequences.

use crate::fixed::Fix64;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Mixes a master seed with a stream number to get an independent sub-seed.
///
/// Used to give subsystems (network jitter, input generation, ...) their own
/// streams so that drawing from one never shifts another.
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    seed.wrapping_mul(0x9e3779b97f4a7c15)
        .wrapping_add(stream.wrapping_mul(0x517cc1b727220a95))
}

/// Seedable fixed-point random source.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    rng: ChaCha8Rng,
    draws: u64,
}

impl DeterministicRng {
    /// Creates a generator for the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            draws: 0,
        }
    }

    /// Restarts the sequence from a new seed.
    pub fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }

    /// Returns the next value in `[0, 1)`.
    pub fn next(&mut self) -> Fix64 {
        Fix64::from_bits(self.next_u32() as i64)
    }

    /// Returns the raw 32-bit value from the stream.
    pub fn next_u32(&mut self) -> u32 {
        self.draws += 1;
        self.rng.next_u32()
    }

    /// Returns an integer in `[0, max)`. Returns 0 when `max` is 0.
    pub fn next_int(&mut self, max: u32) -> u32 {
        ((self.next_u32() as u64 * max as u64) >> 32) as u32
    }

    /// Returns a value in `[min, max)`.
    pub fn next_range(&mut self, min: Fix64, max: Fix64) -> Fix64 {
        min + (max - min) * self.next()
    }

    /// Returns true with the given probability (in `[0, 1]`).
    pub fn next_bool(&mut self, probability: Fix64) -> bool {
        self.next() < probability
    }

    /// Returns a random element from a slice.
    pub fn pick<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            slice.get(self.next_int(slice.len() as u32) as usize)
        }
    }

    /// Shuffles a slice in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// The seed this sequence started from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of raw values drawn since the last (re)seed.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}
