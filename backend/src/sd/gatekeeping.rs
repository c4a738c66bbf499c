//! Gatekeeping: referral capacity policies
//!
//! How many waiting patients may present for a GP referral per day is
//! gatekept. The policy sees the current severity-band stocks (counts of
//! waiting patients, most severe band first), the waiting population, the
//! presenting rate, and the current time, and returns the allowed
//! presentation rate per band. Capacity is always granted most-severe-first.

use serde::{Deserialize, Serialize};

/// Number of severity bands (stocks) in the waiting population
pub const NUM_BANDS: usize = 3;

/// Referral capacity policy, selected by scenario configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatekeepingPolicy {
    /// Refer at most a fixed proportion of the waiting population per day
    Proportional { threshold: f64 },

    /// Refer at most a fixed number of patients per day
    Fixed { threshold: f64 },

    /// Fixed-style capacity that varies sinusoidally with the season
    Seasonal {
        baseline: f64,
        amplitude: f64,
        /// Period of the seasonal cycle in days
        period: f64,
        /// Phase shift in days
        phase_shift: f64,
    },
}

impl GatekeepingPolicy {
    /// Structural validation; surfaced as a configuration error before a run
    pub fn validate(&self) -> Result<(), String> {
        match self {
            GatekeepingPolicy::Proportional { threshold } => {
                if !(0.0..=1.0).contains(threshold) {
                    return Err(format!(
                        "proportional gatekeeping threshold must be in [0, 1], got {}",
                        threshold
                    ));
                }
            }
            GatekeepingPolicy::Fixed { threshold } => {
                if !threshold.is_finite() || *threshold < 0.0 {
                    return Err(format!(
                        "fixed gatekeeping threshold must be finite and >= 0, got {}",
                        threshold
                    ));
                }
            }
            GatekeepingPolicy::Seasonal { period, .. } => {
                if *period <= 0.0 {
                    return Err(format!("seasonal gatekeeping period must be > 0, got {}", period));
                }
            }
        }
        Ok(())
    }

    /// Allowed presentation rate per band at time `t`
    ///
    /// `stocks` are waiting-patient counts per band, most severe first;
    /// `population` is their sum; `presenting_rate` is the per-day rate at
    /// which waiting patients seek a referral. Returned rates never exceed
    /// demand (`presenting_rate * stock`).
    pub fn allowed_rates(
        &self,
        stocks: [f64; NUM_BANDS],
        population: f64,
        presenting_rate: f64,
        t: f64,
    ) -> [f64; NUM_BANDS] {
        match self {
            GatekeepingPolicy::Proportional { threshold } => {
                let mut rates = [0.0; NUM_BANDS];
                let mut subtracted = 0.0;
                for (i, stock) in stocks.iter().enumerate() {
                    if *stock > 0.0 {
                        let ratio = ((threshold * population - subtracted) / stock).clamp(0.0, 1.0);
                        rates[i] = presenting_rate * ratio * stock;
                    }
                    subtracted += stock;
                }
                rates
            }
            GatekeepingPolicy::Fixed { threshold } => {
                Self::capped_rates(stocks, presenting_rate, *threshold)
            }
            GatekeepingPolicy::Seasonal {
                baseline,
                amplitude,
                period,
                phase_shift,
            } => {
                let capacity = (baseline
                    + amplitude * (2.0 * std::f64::consts::PI * (t + phase_shift) / period).sin())
                .max(0.0);
                if population == 0.0 || capacity == 0.0 {
                    return [0.0; NUM_BANDS];
                }
                Self::capped_rates(stocks, presenting_rate, capacity)
            }
        }
    }

    /// Hand a fixed capacity out most-severe-first until it runs dry
    fn capped_rates(stocks: [f64; NUM_BANDS], presenting_rate: f64, capacity: f64) -> [f64; NUM_BANDS] {
        let mut rates = [0.0; NUM_BANDS];
        let mut remaining = capacity;
        for (i, stock) in stocks.iter().enumerate() {
            let demand = presenting_rate * stock;
            let allowed = demand.min(remaining);
            rates[i] = allowed;
            remaining = (remaining - allowed).max(0.0);
        }
        rates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STOCKS: [f64; 3] = [1000.0, 3000.0, 6000.0];
    const PRESENTING_RATE: f64 = 0.002;

    fn population() -> f64 {
        SAMPLE_STOCKS.iter().sum()
    }

    fn assert_rates(obtained: [f64; 3], expected: [f64; 3]) {
        for (o, e) in obtained.iter().zip(expected.iter()) {
            assert!((o - e).abs() < 1e-9, "expected {:?}, got {:?}", expected, obtained);
        }
    }

    #[test]
    fn test_proportional_gatekeeping() {
        let policy = GatekeepingPolicy::Proportional { threshold: 0.4 };
        let rates = policy.allowed_rates(SAMPLE_STOCKS, population(), PRESENTING_RATE, 0.0);
        // 40% of 10000 = 4000: band 0 fully allowed (2/day), band 1 fully
        // allowed (6/day), band 2 squeezed out entirely
        assert_rates(rates, [2.0, 6.0, 0.0]);
    }

    #[test]
    fn test_fixed_gatekeeping() {
        let policy = GatekeepingPolicy::Fixed { threshold: 16.0 };
        let rates = policy.allowed_rates(SAMPLE_STOCKS, population(), PRESENTING_RATE, 0.0);
        // Demands are [2, 6, 12]; 16/day of capacity leaves 8 for band 2
        assert_rates(rates, [2.0, 6.0, 8.0]);
    }

    #[test]
    fn test_seasonal_gatekeeping_at_phase_zero() {
        let policy = GatekeepingPolicy::Seasonal {
            baseline: 8.0,
            amplitude: 4.0,
            period: 365.0,
            phase_shift: 0.0,
        };
        // sin(0) = 0 → capacity 8; bands 0 and 1 exhaust it
        let rates = policy.allowed_rates(SAMPLE_STOCKS, population(), PRESENTING_RATE, 0.0);
        assert_rates(rates, [2.0, 6.0, 0.0]);
    }

    #[test]
    fn test_seasonal_gatekeeping_peak() {
        let policy = GatekeepingPolicy::Seasonal {
            baseline: 8.0,
            amplitude: 4.0,
            period: 365.0,
            phase_shift: 0.0,
        };
        // Quarter period: sin = 1 → capacity 12, band 2 gets the remainder
        let rates = policy.allowed_rates(SAMPLE_STOCKS, population(), PRESENTING_RATE, 365.0 / 4.0);
        assert_rates(rates, [2.0, 6.0, 4.0]);
    }

    #[test]
    fn test_seasonal_empty_population_is_all_zero() {
        let policy = GatekeepingPolicy::Seasonal {
            baseline: 8.0,
            amplitude: 2.0,
            period: 365.0,
            phase_shift: 0.0,
        };
        let rates = policy.allowed_rates([0.0; 3], 0.0, PRESENTING_RATE, 10.0);
        assert_rates(rates, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_allowed_never_exceeds_demand() {
        let policy = GatekeepingPolicy::Fixed { threshold: 1e9 };
        let rates = policy.allowed_rates(SAMPLE_STOCKS, population(), PRESENTING_RATE, 0.0);
        assert_rates(rates, [2.0, 6.0, 12.0]);
    }

    #[test]
    fn test_validate() {
        assert!(GatekeepingPolicy::Proportional { threshold: 1.5 }.validate().is_err());
        assert!(GatekeepingPolicy::Fixed { threshold: -1.0 }.validate().is_err());
        assert!(GatekeepingPolicy::Seasonal {
            baseline: 8.0,
            amplitude: 2.0,
            period: 0.0,
            phase_shift: 0.0
        }
        .validate()
        .is_err());
        assert!(GatekeepingPolicy::Proportional { threshold: 0.4 }.validate().is_ok());
    }
}
