//! Deterioration models
//!
//! The exact equation form is a domain parameter, so the model is a
//! config-driven enum rather than a hard-coded law. All shipped forms have
//! non-negative derivatives (validated), which makes the waiting-time score
//! monotone non-decreasing absent a clinical reset.
//!
//! Each form also exposes its threshold-crossing time in closed form where
//! one exists; the coordinator uses it to schedule escalation checks exactly
//! at the crossing instant.

use serde::{Deserialize, Serialize};

/// Per-patient deterioration law, selected by scenario configuration
///
/// # Example
/// ```
/// use pathway_simulator_core_rs::sd::DeteriorationModel;
///
/// let model = DeteriorationModel::Linear { rate: 0.2 };
/// // score 0 at t=0, threshold 1.0 → crossing at exactly t=5
/// assert_eq!(model.crossing_time(0.0, 0.0, 1.0), Some(5.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeteriorationModel {
    /// Constant-rate worsening: `score' = rate`
    Linear { rate: f64 },

    /// Proportional worsening: `score' = rate * score` (score must start > 0)
    Exponential { rate: f64 },

    /// Score-dependent piecewise-constant rate; segments ordered by
    /// ascending `from_score`, first segment starting at 0
    Piecewise { segments: Vec<PiecewiseSegment> },
}

/// One piece of a piecewise-constant rate law
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseSegment {
    /// Rate applies while `score >= from_score` (until the next segment)
    pub from_score: f64,
    pub rate: f64,
}

impl DeteriorationModel {
    /// Structural validation; surfaced as a configuration error before a run
    pub fn validate(&self) -> Result<(), String> {
        match self {
            DeteriorationModel::Linear { rate } | DeteriorationModel::Exponential { rate } => {
                if !rate.is_finite() || *rate < 0.0 {
                    return Err(format!("deterioration rate must be finite and >= 0, got {}", rate));
                }
            }
            DeteriorationModel::Piecewise { segments } => {
                if segments.is_empty() {
                    return Err("piecewise deterioration needs at least one segment".to_string());
                }
                if segments[0].from_score != 0.0 {
                    return Err("first piecewise segment must start at score 0".to_string());
                }
                for pair in segments.windows(2) {
                    if pair[1].from_score <= pair[0].from_score {
                        return Err("piecewise segments must be strictly increasing".to_string());
                    }
                }
                for segment in segments {
                    if !segment.rate.is_finite() || segment.rate < 0.0 {
                        return Err(format!(
                            "piecewise rate must be finite and >= 0, got {}",
                            segment.rate
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Instantaneous rate of change at the given score
    pub fn derivative(&self, score: f64) -> f64 {
        match self {
            DeteriorationModel::Linear { rate } => *rate,
            DeteriorationModel::Exponential { rate } => rate * score,
            DeteriorationModel::Piecewise { segments } => segments
                .iter()
                .rev()
                .find(|s| score >= s.from_score)
                .map(|s| s.rate)
                .unwrap_or(0.0),
        }
    }

    /// Stiffness bound for the integrator stability check
    ///
    /// Returns the largest `|d(score')/d(score)|` over scores up to the
    /// threshold; the configured step must be small relative to its inverse.
    /// Zero for forms Euler integrates exactly.
    pub fn stiffness(&self, _threshold: f64) -> f64 {
        match self {
            DeteriorationModel::Linear { .. } => 0.0,
            DeteriorationModel::Exponential { rate } => *rate,
            DeteriorationModel::Piecewise { .. } => 0.0,
        }
    }

    /// Absolute time at which the score first reaches `threshold`, in closed
    /// form, starting from `score` at time `at`
    ///
    /// `None` means the score can never reach the threshold (zero rate, or an
    /// exponential starting from zero).
    pub fn crossing_time(&self, score: f64, at: f64, threshold: f64) -> Option<f64> {
        if score >= threshold {
            return Some(at);
        }
        match self {
            DeteriorationModel::Linear { rate } => {
                if *rate > 0.0 {
                    Some(at + (threshold - score) / rate)
                } else {
                    None
                }
            }
            DeteriorationModel::Exponential { rate } => {
                if *rate > 0.0 && score > 0.0 {
                    Some(at + (threshold / score).ln() / rate)
                } else {
                    None
                }
            }
            DeteriorationModel::Piecewise { segments } => {
                let mut current = score;
                let mut elapsed = 0.0;
                for (i, segment) in segments.iter().enumerate() {
                    let ceiling = segments
                        .get(i + 1)
                        .map(|next| next.from_score)
                        .unwrap_or(f64::INFINITY);
                    if current >= ceiling {
                        continue;
                    }
                    let target = threshold.min(ceiling);
                    if segment.rate <= 0.0 {
                        // Stuck below the threshold in a zero-rate band
                        return None;
                    }
                    elapsed += (target - current) / segment.rate;
                    if target >= threshold {
                        return Some(at + elapsed);
                    }
                    current = target;
                }
                None
            }
        }
    }
}
