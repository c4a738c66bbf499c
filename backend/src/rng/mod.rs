//! Deterministic random number generation
//!
//! Uses the xorshift64* algorithm for fast, deterministic random number
//! generation. CRITICAL: all randomness in the simulator MUST go through this
//! module, and draws are consumed in a fixed order per processed event
//! (integrator noise, then automaton draw, then resource tie-break) so that a
//! fixed seed reproduces a run exactly.

mod xorshift;

pub use xorshift::RngManager;
