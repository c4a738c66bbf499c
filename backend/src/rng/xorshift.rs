//! xorshift64* random number generator
//!
//! Fast, high-quality PRNG suitable for simulation. 64-bit state, 64-bit
//! output, passes TestU01's BigCrush.
//!
//! # Determinism
//!
//! Same seed → same sequence. This underpins replayable runs and the Monte
//! Carlo replication model: each replication owns a private generator seeded
//! independently, with no shared state between runs.

use serde::{Deserialize, Serialize};

/// Deterministic random number generator using xorshift64*
///
/// # Example
/// ```
/// use pathway_simulator_core_rs::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let draw = rng.next_f64();          // uniform in [0, 1)
/// let gap = rng.exponential(4.0);     // inter-arrival time, rate 4/day
/// assert!(draw >= 0.0 && draw < 1.0);
/// assert!(gap >= 0.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngManager {
    /// Internal state (64-bit)
    state: u64,
}

impl RngManager {
    /// Create a new RNG with the given seed
    pub fn new(seed: u64) -> Self {
        // xorshift requires non-zero state
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Generate the next random u64, advancing internal state
    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Generate a random value in `[min, max)`
    ///
    /// # Panics
    /// Panics if `min >= max`.
    pub fn range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min < max, "min must be less than max");

        let value = self.next();
        let range_size = (max - min) as u64;
        min + (value % range_size) as i64
    }

    /// Generate a random f64 in `[0.0, 1.0)`
    pub fn next_f64(&mut self) -> f64 {
        let value = self.next();
        (value >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Sample from a Poisson distribution with mean `lambda` (Knuth)
    ///
    /// Used for arrival counts over an interval. A non-positive rate yields
    /// zero arrivals.
    pub fn poisson(&mut self, lambda: f64) -> u64 {
        if lambda <= 0.0 {
            return 0;
        }
        let l = (-lambda).exp();
        let mut k: u64 = 0;
        let mut p = 1.0;
        loop {
            p *= self.next_f64();
            if p <= l {
                return k;
            }
            k += 1;
        }
    }

    /// Sample from an exponential distribution with the given rate (inverse CDF)
    ///
    /// Used for inter-arrival gaps and presentation delays.
    ///
    /// # Panics
    /// Panics if `rate` is not strictly positive.
    pub fn exponential(&mut self, rate: f64) -> f64 {
        assert!(rate > 0.0, "exponential rate must be positive");
        // 1 - u avoids ln(0); next_f64 never returns 1.0
        let u = self.next_f64();
        -(1.0 - u).ln() / rate
    }

    /// Sample from the standard normal distribution (Box-Muller)
    ///
    /// Used for the optional integrator noise term.
    pub fn standard_normal(&mut self) -> f64 {
        let u1 = self.next_f64();
        let u2 = self.next_f64();
        (-2.0 * (1.0 - u1).ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Get current RNG state (for checkpointing/replay)
    pub fn get_state(&self) -> u64 {
        self.state
    }
}
