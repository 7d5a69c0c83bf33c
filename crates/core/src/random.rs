//! Injectable randomness for identifiers.
//!
//! SSRCs, initial RTP sequence numbers and timestamps, RTSP session ids and
//! UDP port probing all draw from a [`RandomSource`]. Production code uses
//! the thread-local generator; tests pass a [`SeededRandom`] so results are
//! reproducible.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Source of random 32-bit values.
pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;
}

/// Draws from `rand::rng()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_u32(&self) -> u32 {
        rand::rng().random::<u32>()
    }
}

/// Deterministic generator seeded from a `u64`.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_u32(&self) -> u32 {
        self.rng.lock().random::<u32>()
    }
}
