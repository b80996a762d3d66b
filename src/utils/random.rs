//! Injectable randomness.
//!
//! Probability rolls, timer jitter and template picks all go through a
//! `RandomSource` so tests can make them deterministic.

use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send {
    /// Uniform value in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick_index(&mut self, len: usize) -> usize {
        ((self.next_f64() * len as f64) as usize).min(len.saturating_sub(1))
    }

    /// Uniform duration in `[min, max]` at millisecond resolution.
    fn range_duration(&mut self, min: Duration, max: Duration) -> Duration {
        let lo = min.num_milliseconds();
        let hi = max.num_milliseconds().max(lo);
        let span = (hi - lo) as f64;
        Duration::milliseconds(lo + (self.next_f64() * (span + 1.0)).floor().min(span) as i64)
    }
}

/// `StdRng`-backed source. Seed it for reproducible runs.
pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for StdRandom {
    fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn pick_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len.max(1))
    }
}
