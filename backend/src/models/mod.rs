//! Domain models: patients, pathway stages, events, and simulation state.

pub mod event;
pub mod patient;
pub mod stage;
pub mod state;

pub use event::{Event, EventLog};
pub use patient::{Patient, PatientStatus, SeverityBand, StageRecord};
pub use stage::PathwayStage;
pub use state::SimulationState;
