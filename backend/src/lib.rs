//! Pathway Simulator Core - Rust Engine
//!
//! Hybrid simulation of patient flow through an orthopaedic referral
//! pathway: a continuous System Dynamics model of deterioration while
//! awaiting GP referral, coupled to a Discrete Event Simulation of the
//! hospital journey, with transition probabilities driven by mined
//! Probabilistic Deterministic Finite Automata.
//!
//! # Architecture
//!
//! - **core**: simulation clock
//! - **rng**: deterministic random number generation
//! - **automaton**: PDFA artifact loading, validation, and sampling
//! - **scheduler**: discrete-event priority queue owning the clock
//! - **sd**: deterioration models, fixed-step integrator, gatekeeping
//! - **models**: domain types (Patient, PathwayStage, Event, State)
//! - **resources**: capacity-constrained pools with queueing
//! - **arrivals**: referral arrival generation
//! - **orchestrator**: the hybrid coordination loop
//!
//! # Critical Invariants
//!
//! 1. All randomness is deterministic (one seeded RNG per run, fixed draw order)
//! 2. The clock never rewinds; event ties break FIFO by insertion order
//! 3. Every stage transition is a valid edge of the governing automaton
//! 4. Per-patient runtime failures censor the patient, never the run

// Module declarations
pub mod arrivals;
pub mod automaton;
pub mod core;
pub mod models;
pub mod orchestrator;
pub mod resources;
pub mod rng;
pub mod scheduler;
pub mod sd;

// Re-exports for convenience
pub use arrivals::{ArrivalConfig, ReferralGenerator};
pub use automaton::{DeadEndStateError, MalformedAutomatonError, Pdfa, PdfaSet};
pub use core::clock::SimulationClock;
pub use models::{
    event::{Event, EventLog},
    patient::{Patient, PatientStatus, SeverityBand, StageRecord},
    stage::PathwayStage,
    state::SimulationState,
};
pub use orchestrator::{
    DelayDistribution, HybridOrchestrator, IntegrationConfig, ResourceConfig, RunOutput,
    RunStatistics, ScenarioConfig, SimulationError, StateSnapshot, StepResult,
};
pub use resources::{Acquisition, QueueDiscipline, ResourceDeadlockError, ResourcePool};
pub use rng::RngManager;
pub use scheduler::{DesEvent, EmptyQueueError, EventKind, EventScheduler};
pub use sd::{
    DeteriorationModel, GatekeepingPolicy, IntegrationMethod, NoiseConfig, SdIntegrator, SdState,
};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn pathway_simulator_core_rs(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_class::<ffi::orchestrator::PyOrchestrator>()?;
    Ok(())
}
