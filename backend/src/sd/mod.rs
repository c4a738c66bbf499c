//! System Dynamics integrator
//!
//! Advances the continuous deterioration state of waiting patients between
//! DES events. The coordinator calls [`SdIntegrator::advance`] for every
//! waiting patient whenever the clock moves, so no patient's SD state ever
//! lags the simulation clock.
//!
//! # Numerical policy
//!
//! Fixed-step integration with the last partial step truncated to land
//! exactly on the target time. Euler is the default (exact for the linear
//! model); RK4 is available for the nonlinear forms. Stability is enforced at
//! configuration time: the step must be small relative to the model's
//! stiffness bound (see [`DeteriorationModel::stiffness`]). All shipped
//! models have non-negative derivatives, and the optional noise term is a
//! multiplicative log-normal factor on the rate, so increments are never
//! negative and deterioration is monotone absent a clinical reset.

pub mod deterioration;
pub mod gatekeeping;

use serde::{Deserialize, Serialize};

pub use deterioration::{DeteriorationModel, PiecewiseSegment};
pub use gatekeeping::{GatekeepingPolicy, NUM_BANDS};

use crate::rng::RngManager;

/// Continuous per-patient state advanced by the integrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SdState {
    /// Deterioration score; monotone non-decreasing between resets
    pub score: f64,
    /// Simulation time this state was last advanced to
    pub last_sync: f64,
}

impl SdState {
    /// Fresh state at the given score and time
    pub fn new(score: f64, at: f64) -> Self {
        Self {
            score,
            last_sync: at,
        }
    }

    /// Clinical reset (e.g. admission): score returns to baseline
    pub fn reset(&mut self, score: f64, at: f64) {
        self.score = score;
        self.last_sync = at;
    }
}

/// Numerical integration method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    Euler,
    Rk4,
}

/// Optional stochastic perturbation of the deterioration rate
///
/// Each `advance` call draws one standard-normal value and scales the rate by
/// `exp(sigma * z - sigma^2 / 2)` (unit-mean log-normal). The factor is strictly
/// positive, so monotonicity survives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    pub sigma: f64,
}

/// Fixed-step integrator for the deterioration equations
///
/// # Example
/// ```
/// use pathway_simulator_core_rs::sd::{DeteriorationModel, IntegrationMethod, SdIntegrator, SdState};
/// use pathway_simulator_core_rs::RngManager;
///
/// let integrator = SdIntegrator::new(IntegrationMethod::Euler, 0.25, None);
/// let model = DeteriorationModel::Linear { rate: 0.2 };
/// let mut rng = RngManager::new(42);
///
/// let mut state = SdState::new(0.0, 0.0);
/// integrator.advance(&model, &mut state, 5.0, &mut rng);
/// assert!((state.score - 1.0).abs() < 1e-12); // Euler is exact for linear
/// assert_eq!(state.last_sync, 5.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdIntegrator {
    method: IntegrationMethod,
    /// Fixed step size in days
    step: f64,
    noise: Option<NoiseConfig>,
}

impl SdIntegrator {
    /// Create an integrator
    ///
    /// # Panics
    /// Panics if `step` is not strictly positive; step validation against the
    /// model's stiffness happens in scenario-config validation.
    pub fn new(method: IntegrationMethod, step: f64, noise: Option<NoiseConfig>) -> Self {
        assert!(step > 0.0 && step.is_finite(), "integration step must be positive");
        Self { method, step, noise }
    }

    /// Configured step size
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Advance `state` from its last sync time up to `to`
    ///
    /// No-op when `to` does not exceed the last sync time (the state is
    /// already current). The final partial step is truncated so the state
    /// lands exactly on `to`.
    pub fn advance(
        &self,
        model: &DeteriorationModel,
        state: &mut SdState,
        to: f64,
        rng: &mut RngManager,
    ) {
        if to <= state.last_sync {
            return;
        }

        let factor = match self.noise {
            Some(NoiseConfig { sigma }) => {
                let z = rng.standard_normal();
                (sigma * z - 0.5 * sigma * sigma).exp()
            }
            None => 1.0,
        };

        let mut t = state.last_sync;
        let mut score = state.score;
        while t < to {
            let h = self.step.min(to - t);
            score = match self.method {
                IntegrationMethod::Euler => score + h * factor * model.derivative(score),
                IntegrationMethod::Rk4 => {
                    let k1 = factor * model.derivative(score);
                    let k2 = factor * model.derivative(score + 0.5 * h * k1);
                    let k3 = factor * model.derivative(score + 0.5 * h * k2);
                    let k4 = factor * model.derivative(score + h * k3);
                    score + (h / 6.0) * (k1 + 2.0 * k2 + 2.0 * k3 + k4)
                }
            };
            t += h;
        }

        state.score = score;
        state.last_sync = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrator(method: IntegrationMethod, step: f64) -> SdIntegrator {
        SdIntegrator::new(method, step, None)
    }

    #[test]
    fn test_euler_exact_for_linear() {
        let model = DeteriorationModel::Linear { rate: 0.4 };
        let mut state = SdState::new(1.0, 2.0);
        let mut rng = RngManager::new(1);

        integrator(IntegrationMethod::Euler, 0.3).advance(&model, &mut state, 4.5, &mut rng);
        assert!((state.score - 2.0).abs() < 1e-12);
        assert_eq!(state.last_sync, 4.5);
    }

    #[test]
    fn test_rk4_close_to_exponential_closed_form() {
        let model = DeteriorationModel::Exponential { rate: 0.5 };
        let mut state = SdState::new(1.0, 0.0);
        let mut rng = RngManager::new(1);

        integrator(IntegrationMethod::Rk4, 0.1).advance(&model, &mut state, 2.0, &mut rng);
        let exact = (0.5_f64 * 2.0).exp();
        assert!(
            (state.score - exact).abs() < 1e-6,
            "rk4 drifted: {} vs {}",
            state.score,
            exact
        );
    }

    #[test]
    fn test_partial_step_lands_exactly_on_target() {
        let model = DeteriorationModel::Linear { rate: 1.0 };
        let mut state = SdState::new(0.0, 0.0);
        let mut rng = RngManager::new(1);

        // 0.7 is not a multiple of the 0.25 step
        integrator(IntegrationMethod::Euler, 0.25).advance(&model, &mut state, 0.7, &mut rng);
        assert_eq!(state.last_sync, 0.7);
        assert!((state.score - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_backward_advance_is_noop() {
        let model = DeteriorationModel::Linear { rate: 1.0 };
        let mut state = SdState::new(3.0, 5.0);
        let mut rng = RngManager::new(1);

        integrator(IntegrationMethod::Euler, 0.25).advance(&model, &mut state, 4.0, &mut rng);
        assert_eq!(state.score, 3.0);
        assert_eq!(state.last_sync, 5.0);
    }

    #[test]
    fn test_monotone_non_decreasing() {
        let model = DeteriorationModel::Exponential { rate: 0.3 };
        let integ = SdIntegrator::new(IntegrationMethod::Rk4, 0.2, Some(NoiseConfig { sigma: 0.5 }));
        let mut rng = RngManager::new(7);
        let mut state = SdState::new(0.5, 0.0);

        let mut previous = state.score;
        for i in 1..=50 {
            integ.advance(&model, &mut state, i as f64 * 0.37, &mut rng);
            assert!(
                state.score >= previous,
                "deterioration decreased: {} -> {}",
                previous,
                state.score
            );
            previous = state.score;
        }
    }

    #[test]
    fn test_reset_restores_baseline() {
        let mut state = SdState::new(4.0, 9.0);
        state.reset(0.0, 9.0);
        assert_eq!(state.score, 0.0);
        assert_eq!(state.last_sync, 9.0);
    }

    #[test]
    #[should_panic(expected = "integration step must be positive")]
    fn test_zero_step_panics() {
        SdIntegrator::new(IntegrationMethod::Euler, 0.0, None);
    }
}
