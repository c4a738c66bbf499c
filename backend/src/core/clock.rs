//! Simulation time management
//!
//! The simulation operates in continuous time (days, `f64`). The clock is
//! advanced only by the event scheduler when an event is popped, or by the
//! coordinator when truncating an integration interval onto an event time.
//! It is never rewound.

use serde::{Deserialize, Serialize};

/// Monotone continuous simulation clock
///
/// # Example
/// ```
/// use pathway_simulator_core_rs::SimulationClock;
///
/// let mut clock = SimulationClock::new();
/// assert_eq!(clock.now(), 0.0);
///
/// clock.advance_to(1.5);
/// assert_eq!(clock.now(), 1.5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationClock {
    /// Current simulation time in days since run start
    now: f64,
}

impl SimulationClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self { now: 0.0 }
    }

    /// Recreate a clock at an arbitrary time (checkpoint restore)
    pub fn at(now: f64) -> Self {
        assert!(now.is_finite(), "clock time must be finite");
        assert!(now >= 0.0, "clock time must be non-negative");
        Self { now }
    }

    /// Current simulation time in days
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Advance the clock to `time`
    ///
    /// # Panics
    /// Panics if `time` is earlier than the current time or not finite.
    /// Rewinding the clock is a programming error, not a recoverable state.
    pub fn advance_to(&mut self, time: f64) {
        assert!(time.is_finite(), "clock time must be finite");
        assert!(
            time >= self.now,
            "clock cannot be rewound: now={}, requested={}",
            self.now,
            time
        );
        self.now = time;
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "clock cannot be rewound")]
    fn test_rewind_panics() {
        let mut clock = SimulationClock::new();
        clock.advance_to(2.0);
        clock.advance_to(1.0);
    }

    #[test]
    fn test_advance_to_same_time_is_allowed() {
        let mut clock = SimulationClock::new();
        clock.advance_to(3.0);
        clock.advance_to(3.0);
        assert_eq!(clock.now(), 3.0);
    }

    #[test]
    #[should_panic(expected = "clock time must be finite")]
    fn test_nan_rejected() {
        let mut clock = SimulationClock::new();
        clock.advance_to(f64::NAN);
    }
}
