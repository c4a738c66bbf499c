//! Simulation state
//!
//! The complete mutable state of one run: every patient, the ordered waiting
//! population the SD model operates on, and the resource pools.
//!
//! # Critical invariants
//!
//! 1. **Waiting validity**: every id in the waiting list names an active
//!    patient in the `AwaitingReferral` stage.
//! 2. **Patient uniqueness**: each patient id appears exactly once.
//! 3. **Pool validity**: every id queued in a pool names an active patient.
//! 4. **Deterministic order**: the waiting list preserves arrival order, so
//!    per-event SD synchronization visits patients in a reproducible order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::patient::{Patient, SeverityBand};
use crate::resources::ResourcePool;
use crate::sd::gatekeeping::NUM_BANDS;

/// Complete state of a running simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationState {
    /// All patients, indexed by id
    patients: HashMap<String, Patient>,

    /// Ids of patients still awaiting referral, in arrival order
    waiting: Vec<String>,

    /// Resource pools, indexed by name
    pools: HashMap<String, ResourcePool>,
}

impl SimulationState {
    /// Create an empty state with the given pools
    pub fn new(pools: Vec<ResourcePool>) -> Self {
        let pools = pools
            .into_iter()
            .map(|pool| (pool.name().to_string(), pool))
            .collect();
        Self {
            patients: HashMap::new(),
            waiting: Vec::new(),
            pools,
        }
    }

    // ========================================================================
    // Patients
    // ========================================================================

    /// Add a newly arrived patient to the active set and waiting population
    ///
    /// # Panics
    /// Panics on a duplicate patient id; ids are generated sequentially and a
    /// collision means the generator was reused across runs.
    pub fn add_patient(&mut self, patient: Patient) {
        let id = patient.id().to_string();
        self.waiting.push(id.clone());
        let previous = self.patients.insert(id, patient);
        assert!(previous.is_none(), "duplicate patient id");
    }

    pub fn get_patient(&self, id: &str) -> Option<&Patient> {
        self.patients.get(id)
    }

    pub fn get_patient_mut(&mut self, id: &str) -> Option<&mut Patient> {
        self.patients.get_mut(id)
    }

    pub fn num_patients(&self) -> usize {
        self.patients.len()
    }

    /// Number of patients still moving through the pathway
    pub fn num_active(&self) -> usize {
        self.patients.values().filter(|p| p.is_active()).count()
    }

    /// All patients (iteration order is not deterministic; sort before use
    /// anywhere determinism matters)
    pub fn patients(&self) -> impl Iterator<Item = &Patient> {
        self.patients.values()
    }

    /// Active patient ids sorted for deterministic end-of-run processing
    pub fn active_ids_sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .patients
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Waiting population (the SD-coupled set)
    // ========================================================================

    /// Ids of waiting patients in arrival order
    pub fn waiting_ids(&self) -> &[String] {
        &self.waiting
    }

    /// Remove a patient from the waiting population (referral or escalation)
    pub fn remove_from_waiting(&mut self, id: &str) {
        self.waiting.retain(|w| w != id);
    }

    /// Waiting-patient counts per severity band, most severe first
    ///
    /// These are the stocks the gatekeeping policies see.
    pub fn stocks(&self) -> [f64; NUM_BANDS] {
        let mut stocks = [0.0; NUM_BANDS];
        for id in &self.waiting {
            if let Some(patient) = self.patients.get(id) {
                stocks[patient.band().index()] += 1.0;
            }
        }
        stocks
    }

    /// Waiting-patient count for one band
    pub fn stock(&self, band: SeverityBand) -> f64 {
        self.stocks()[band.index()]
    }

    // ========================================================================
    // Resource pools
    // ========================================================================

    pub fn pool(&self, name: &str) -> Option<&ResourcePool> {
        self.pools.get(name)
    }

    pub fn pool_mut(&mut self, name: &str) -> Option<&mut ResourcePool> {
        self.pools.get_mut(name)
    }

    /// Pool names sorted for deterministic statistics sampling
    pub fn pool_names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.keys().cloned().collect();
        names.sort();
        names
    }

    /// All pools (checkpointing)
    pub fn pools(&self) -> impl Iterator<Item = &ResourcePool> {
        self.pools.values()
    }
}
