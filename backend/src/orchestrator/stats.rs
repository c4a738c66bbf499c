//! Run statistics and output records
//!
//! Aggregates are accumulated incrementally while the run executes and
//! emitted together with the per-patient histories as a [`RunOutput`]. The
//! exact serialization format downstream of JSON is owned by the surrounding
//! I/O layer; everything here just derives serde.
//!
//! Maps are `BTreeMap` so serialized output is byte-identical across runs
//! with the same seed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::patient::{PatientStatus, SeverityBand, StageRecord};

/// Incremental summary of a set of observed durations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    count: usize,
    total: f64,
    max: f64,
}

impl SummaryStats {
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        if value > self.max {
            self.max = value;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

/// One queue-length observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueSample {
    pub time: f64,
    pub length: usize,
}

/// Aggregate statistics for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Patients who reached a terminal stage normally
    pub completed: usize,

    /// Patients forcibly censored
    pub censored: usize,

    /// Deterioration-threshold breaches (one-shot per patient)
    pub threshold_breaches: usize,

    /// Presentations pushed back by gatekeeping
    pub deferrals: usize,

    /// Wait from arrival to referral, over referred patients
    pub referral_wait: SummaryStats,

    /// Wait in each resource queue, over granted requests
    pub resource_waits: BTreeMap<String, SummaryStats>,

    /// Queue length per pool, sampled at every event pop
    pub queue_lengths: BTreeMap<String, Vec<QueueSample>>,
}

impl RunStatistics {
    /// Prepare per-pool series for the given pool names
    pub fn new(pool_names: &[String]) -> Self {
        let mut stats = Self::default();
        for name in pool_names {
            stats.resource_waits.insert(name.clone(), SummaryStats::default());
            stats.queue_lengths.insert(name.clone(), Vec::new());
        }
        stats
    }

    pub fn record_referral_wait(&mut self, wait: f64) {
        self.referral_wait.record(wait);
    }

    pub fn record_resource_wait(&mut self, pool: &str, wait: f64) {
        self.resource_waits.entry(pool.to_string()).or_default().record(wait);
    }

    pub fn record_queue_length(&mut self, pool: &str, time: f64, length: usize) {
        self.queue_lengths
            .entry(pool.to_string())
            .or_default()
            .push(QueueSample { time, length });
    }
}

/// Per-patient output record: the ordered stage history plus key timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientHistoryRecord {
    pub patient_id: String,
    pub band: SeverityBand,
    pub status: PatientStatus,
    pub arrival_time: f64,
    pub referral_time: Option<f64>,
    pub admission_time: Option<f64>,
    /// Final deterioration score when the patient left the pathway
    pub final_score: f64,
    pub records: Vec<StageRecord>,
}

/// Complete run output for downstream analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    /// Deterministic run identifier (UUID v5 of the seed), so identical
    /// configurations yield byte-identical outputs
    pub run_id: String,
    pub seed: u64,
    pub end_time: f64,
    /// Per-patient histories, sorted by patient id
    pub histories: Vec<PatientHistoryRecord>,
    pub statistics: RunStatistics,
}

impl RunOutput {
    /// Deterministic run id derived from the seed
    pub fn run_id_for_seed(seed: u64) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, &seed.to_be_bytes()).to_string()
    }
}
