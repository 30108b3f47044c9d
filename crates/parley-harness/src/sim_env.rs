//! Simulation environment: virtual clock and seeded RNG.
//!
//! Clones share one clock and one RNG, so the server and every client in a
//! cluster see the same time and draw from a single deterministic stream.

use std::{
    ops::Sub,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Wall-clock origin for `send_time` stamps (2023-11-14T22:13:20Z).
const EPOCH_SECS: u64 = 1_700_000_000;

/// Point on the virtual timeline, measured from the environment's creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Offset from the start of the simulation.
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

/// Deterministic [`Environment`] for tests.
#[derive(Debug, Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific seed. Same seed, same run.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        *clock += by;
    }

    /// Time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }

    fn wall_clock_secs(&self) -> u64 {
        EPOCH_SECS + self.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);
        assert_eq!(a.random_array::<32>(), b.random_array::<32>());
        assert_ne!(a.random_array::<32>(), SimEnv::with_seed(8).random_array::<32>());
    }

    #[test]
    fn clones_share_clock_and_rng() {
        let env = SimEnv::with_seed(1);
        let clone = env.clone();
        let first = env.random_u64();

        clone.advance(Duration::from_secs(5));
        assert_eq!(env.now().since_start(), Duration::from_secs(5));
        assert_ne!(clone.random_u64(), first);
    }

    #[test]
    fn instants_subtract_to_elapsed() {
        let env = SimEnv::new();
        let start = env.now();
        env.advance(Duration::from_millis(1500));

        assert_eq!(env.now() - start, Duration::from_millis(1500));
        assert_eq!(start - env.now(), Duration::ZERO);
        assert_eq!(env.wall_clock_secs(), EPOCH_SECS + 1);
    }
}
