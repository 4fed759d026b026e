//! Simulation context: virtual clock and seeded random streams.

use lockstep_core::derive_seed;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Random stream used to generate player input.
pub const STREAM_INPUT: u64 = 1;

/// Random stream used for network jitter.
pub const STREAM_NETWORK: u64 = 2;

/// Shared harness context backed by a virtual clock.
///
/// The clock counts real-time ticks (one `step` opportunity per replica)
/// and only moves when the harness advances it. Clones share the clock.
pub struct SimContext {
    /// Master seed for this run
    seed: u64,

    /// Real-time ticks elapsed since the run started
    virtual_ticks: Arc<Mutex<u64>>,

    /// Ticks per virtual second
    tick_rate: u32,
}

impl SimContext {
    /// Creates a context with the given seed and tick rate.
    pub fn new(seed: u64, tick_rate: u32) -> Self {
        Self {
            seed,
            virtual_ticks: Arc::new(Mutex::new(0)),
            tick_rate: tick_rate.max(1),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64, tick_rate: u32) -> Arc<Self> {
        Arc::new(Self::new(seed, tick_rate))
    }

    /// Advances the clock by one tick and returns the new tick count.
    pub fn advance(&self) -> u64 {
        let mut ticks = self.virtual_ticks.lock().unwrap_or_else(PoisonError::into_inner);
        *ticks += 1;
        *ticks
    }

    /// Ticks elapsed so far.
    pub fn ticks(&self) -> u64 {
        *self.virtual_ticks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Virtual time elapsed so far.
    pub fn now(&self) -> Duration {
        self.time_at(self.ticks())
    }

    /// Virtual time at a given tick count.
    pub fn time_at(&self, ticks: u64) -> Duration {
        let rate = self.tick_rate as u64;
        // rem < rate, so rem * 1e9 fits in a u64
        let rem = ticks % rate;
        Duration::from_secs(ticks / rate) + Duration::from_nanos(rem * 1_000_000_000 / rate)
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sub-seed for an independent random stream.
    ///
    /// Changing how much one subsystem draws never shifts another's stream.
    pub fn stream_seed(&self, stream: u64) -> u64 {
        derive_seed(self.seed, stream)
    }

    /// Fresh generator for a random stream.
    pub fn stream_rng(&self, stream: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.stream_seed(stream))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_ticks: Arc::clone(&self.virtual_ticks),
            tick_rate: self.tick_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_clock_advances_in_ticks() {
        let ctx = SimContext::new(42, 20);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance();
        assert_eq!(ctx.ticks(), 1);
        assert_eq!(ctx.now(), Duration::from_millis(50));

        for _ in 0..19 {
            ctx.advance();
        }
        assert_eq!(ctx.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_time_beyond_u32_ticks() {
        let ctx = SimContext::new(1, 20);
        let ticks = u32::MAX as u64 + 21;
        assert_eq!(
            ctx.time_at(ticks),
            Duration::from_secs(ticks / 20) + Duration::from_millis(50 * (ticks % 20))
        );
        assert!(ctx.time_at(ticks) > ctx.time_at(u32::MAX as u64));
    }

    #[test]
    fn test_clone_shares_clock() {
        let ctx1 = SimContext::new(42, 20);
        let ctx2 = ctx1.clone();

        ctx1.advance();
        ctx1.advance();

        assert_eq!(ctx2.ticks(), 2);
    }

    #[test]
    fn test_streams_are_deterministic_and_independent() {
        let ctx1 = SimContext::new(7, 20);
        let ctx2 = SimContext::new(7, 20);

        assert_eq!(
            ctx1.stream_rng(STREAM_INPUT).next_u64(),
            ctx2.stream_rng(STREAM_INPUT).next_u64()
        );
        assert_ne!(
            ctx1.stream_seed(STREAM_INPUT),
            ctx1.stream_seed(STREAM_NETWORK)
        );
    }
}
