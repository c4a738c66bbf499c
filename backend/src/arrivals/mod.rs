//! Referral arrival generation
//!
//! New unwell patients enter the waiting population as a Poisson process:
//! each arrival schedules the next one an exponential gap later, keeping the
//! event queue finite. Every patient is assigned a severity band (most severe
//! first, mirroring the three stocks of the population-level SD view) and a
//! band-specific initial deterioration score.
//!
//! All generation is deterministic given the run RNG: same seed + same
//! config → same arrival times, bands, and scores.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::patient::{Patient, SeverityBand};
use crate::rng::RngManager;
use crate::sd::gatekeeping::GatekeepingPolicy;

/// Arrival configuration for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalConfig {
    /// Expected new unwell patients per day (Poisson intensity)
    pub rate_per_day: f64,

    /// Proportions of arrivals per severity band, most severe first;
    /// must sum to 1
    pub band_splits: [f64; 3],

    /// Initial deterioration score per band, most severe first
    pub initial_scores: [f64; 3],

    /// Time of the first arrival (defaults to 0)
    #[serde(default)]
    pub first_arrival: f64,

    /// Optional referral-capacity gatekeeping
    #[serde(default)]
    pub gatekeeping: Option<GatekeepingPolicy>,
}

impl ArrivalConfig {
    /// Structural validation; surfaced as a configuration error before a run
    pub fn validate(&self) -> Result<(), String> {
        if !self.rate_per_day.is_finite() || self.rate_per_day < 0.0 {
            return Err(format!(
                "arrival rate must be finite and >= 0, got {}",
                self.rate_per_day
            ));
        }
        let split_sum: f64 = self.band_splits.iter().sum();
        if (split_sum - 1.0).abs() > 1e-9 {
            return Err(format!("band splits must sum to 1, got {}", split_sum));
        }
        if self.band_splits.iter().any(|s| *s < 0.0) {
            return Err("band splits must be non-negative".to_string());
        }
        if self.initial_scores.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err("initial scores must be finite and >= 0".to_string());
        }
        if self.first_arrival < 0.0 {
            return Err(format!("first arrival must be >= 0, got {}", self.first_arrival));
        }
        if let Some(policy) = &self.gatekeeping {
            policy.validate()?;
        }
        Ok(())
    }
}

/// Generator of referral arrivals
pub struct ReferralGenerator {
    config: ArrivalConfig,
    /// Next patient number (ids are "pt_{:08}")
    next_patient_num: usize,
}

impl ReferralGenerator {
    /// Create a generator
    pub fn new(config: ArrivalConfig) -> Self {
        Self {
            config,
            next_patient_num: 0,
        }
    }

    pub fn config(&self) -> &ArrivalConfig {
        &self.config
    }

    /// Number of patients generated so far
    pub fn num_generated(&self) -> usize {
        self.next_patient_num
    }

    /// Time of the arrival after one at `now`, or `None` if arrivals are off
    pub fn next_arrival_time(&self, now: f64, rng: &mut RngManager) -> Option<f64> {
        if self.config.rate_per_day > 0.0 {
            Some(now + rng.exponential(self.config.rate_per_day))
        } else {
            None
        }
    }

    /// Create the patient arriving at `time`
    ///
    /// Samples the severity band from the configured splits (one draw) and
    /// assigns the band's initial deterioration score. `automaton_states`
    /// must be the initial node map from the loaded `PdfaSet`.
    pub fn create_patient(
        &mut self,
        time: f64,
        automaton_states: HashMap<String, usize>,
        rng: &mut RngManager,
    ) -> Patient {
        let band = self.sample_band(rng);
        let id = format!("pt_{:08}", self.next_patient_num);
        self.next_patient_num += 1;

        Patient::new(
            id,
            band,
            self.config.initial_scores[band.index()],
            time,
            automaton_states,
        )
    }

    fn sample_band(&self, rng: &mut RngManager) -> SeverityBand {
        let draw = rng.next_f64();
        let mut cumulative = 0.0;
        for band in SeverityBand::ALL {
            cumulative += self.config.band_splits[band.index()];
            if draw < cumulative {
                return band;
            }
        }
        // Splits sum to 1 within tolerance; a draw past the total lands on
        // the last band.
        SeverityBand::Mild
    }

    /// Restore the id counter from a checkpoint
    pub fn restore_counter(&mut self, next_patient_num: usize) {
        self.next_patient_num = next_patient_num;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: f64) -> ArrivalConfig {
        ArrivalConfig {
            rate_per_day: rate,
            band_splits: [0.2, 0.3, 0.5],
            initial_scores: [0.6, 0.3, 0.0],
            first_arrival: 0.0,
            gatekeeping: None,
        }
    }

    #[test]
    fn test_validate_band_splits() {
        let mut c = config(2.0);
        assert!(c.validate().is_ok());

        c.band_splits = [0.5, 0.5, 0.5];
        assert!(c.validate().is_err());

        c.band_splits = [1.2, -0.2, 0.0];
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_zero_rate_means_no_next_arrival() {
        let generator = ReferralGenerator::new(config(0.0));
        let mut rng = RngManager::new(42);
        assert_eq!(generator.next_arrival_time(1.0, &mut rng), None);
    }

    #[test]
    fn test_next_arrival_strictly_later() {
        let generator = ReferralGenerator::new(config(4.0));
        let mut rng = RngManager::new(42);
        for _ in 0..100 {
            let next = generator.next_arrival_time(10.0, &mut rng).unwrap();
            assert!(next >= 10.0);
        }
    }

    #[test]
    fn test_patient_ids_sequential() {
        let mut generator = ReferralGenerator::new(config(1.0));
        let mut rng = RngManager::new(42);

        let a = generator.create_patient(0.0, HashMap::new(), &mut rng);
        let b = generator.create_patient(1.0, HashMap::new(), &mut rng);
        assert_eq!(a.id(), "pt_00000000");
        assert_eq!(b.id(), "pt_00000001");
        assert_eq!(generator.num_generated(), 2);
    }

    #[test]
    fn test_generation_deterministic() {
        let mut g1 = ReferralGenerator::new(config(1.0));
        let mut g2 = ReferralGenerator::new(config(1.0));
        let mut rng1 = RngManager::new(777);
        let mut rng2 = RngManager::new(777);

        for i in 0..50 {
            let p1 = g1.create_patient(i as f64, HashMap::new(), &mut rng1);
            let p2 = g2.create_patient(i as f64, HashMap::new(), &mut rng2);
            assert_eq!(p1.band(), p2.band());
            assert_eq!(p1.sd().score, p2.sd().score);
        }
    }

    #[test]
    fn test_band_sampling_respects_splits() {
        let mut generator = ReferralGenerator::new(config(1.0));
        let mut rng = RngManager::new(2024);

        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            let p = generator.create_patient(0.0, HashMap::new(), &mut rng);
            counts[p.band().index()] += 1;
        }

        // Rough proportions; the splits are [0.2, 0.3, 0.5]
        assert!((counts[0] as f64 / 3000.0 - 0.2).abs() < 0.05);
        assert!((counts[1] as f64 / 3000.0 - 0.3).abs() < 0.05);
        assert!((counts[2] as f64 / 3000.0 - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_initial_score_follows_band() {
        let mut generator = ReferralGenerator::new(config(1.0));
        let mut rng = RngManager::new(5);
        for _ in 0..20 {
            let p = generator.create_patient(0.0, HashMap::new(), &mut rng);
            assert_eq!(
                p.sd().score,
                generator.config().initial_scores[p.band().index()]
            );
        }
    }
}
