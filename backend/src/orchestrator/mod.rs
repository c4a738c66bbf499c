//! Orchestrator - the hybrid coordination loop
//!
//! Couples the SD integrator to the DES event loop and drives a run to
//! completion. See `engine.rs` for the loop itself, `stats.rs` for the
//! output records, and `checkpoint.rs` for pause/resume.

pub mod checkpoint;
pub mod engine;
pub mod stats;

// Re-export main types for convenience
pub use engine::{
    DelayDistribution, HybridOrchestrator, IntegrationConfig, ResourceConfig, ScenarioConfig,
    SimulationError, StepResult,
};
pub use stats::{PatientHistoryRecord, QueueSample, RunOutput, RunStatistics, SummaryStats};

// Re-export checkpoint types
pub use checkpoint::{compute_config_hash, StateSnapshot};
