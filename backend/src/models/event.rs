//! Event logging for replay and auditing
//!
//! Captures every significant state change during a run. The log enables:
//! - replay-identity checks (two runs with the same seed produce equal logs)
//! - debugging (what happened, when, to whom)
//! - downstream analysis (the I/O layer serializes these records)

use serde::{Deserialize, Serialize};

use crate::models::patient::SeverityBand;
use crate::models::stage::PathwayStage;

/// An observed state change
///
/// All events carry the simulation time at which they occurred, in the order
/// they were processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new patient joined the waiting population
    Arrival {
        time: f64,
        patient_id: String,
        band: SeverityBand,
    },

    /// Gatekeeping deferred a presentation; it was rescheduled
    ReferralDeferred { time: f64, patient_id: String },

    /// A stage transition via a PDFA edge (sampled or forced)
    StageTransition {
        time: f64,
        patient_id: String,
        from: PathwayStage,
        to: PathwayStage,
        symbol: String,
    },

    /// An escalation check was scheduled at the predicted crossing time
    EscalationScheduled {
        time: f64,
        patient_id: String,
        due: f64,
    },

    /// A waiting patient's deterioration crossed the configured threshold
    ThresholdBreach {
        time: f64,
        patient_id: String,
        score: f64,
        threshold: f64,
    },

    /// A patient joined a resource queue (no free capacity)
    ResourceQueued {
        time: f64,
        patient_id: String,
        pool: String,
        queue_len: usize,
    },

    /// A queued patient was granted a resource unit
    ResourceGranted {
        time: f64,
        patient_id: String,
        pool: String,
        waited: f64,
    },

    /// A patient was forcibly censored
    Censored {
        time: f64,
        patient_id: String,
        reason: String,
    },

    /// The run reached its stop condition
    RunCompleted {
        time: f64,
        completed: usize,
        censored: usize,
    },
}

impl Event {
    /// Simulation time at which the event occurred
    pub fn time(&self) -> f64 {
        match self {
            Event::Arrival { time, .. } => *time,
            Event::ReferralDeferred { time, .. } => *time,
            Event::StageTransition { time, .. } => *time,
            Event::EscalationScheduled { time, .. } => *time,
            Event::ThresholdBreach { time, .. } => *time,
            Event::ResourceQueued { time, .. } => *time,
            Event::ResourceGranted { time, .. } => *time,
            Event::Censored { time, .. } => *time,
            Event::RunCompleted { time, .. } => *time,
        }
    }

    /// Short description of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Arrival { .. } => "Arrival",
            Event::ReferralDeferred { .. } => "ReferralDeferred",
            Event::StageTransition { .. } => "StageTransition",
            Event::EscalationScheduled { .. } => "EscalationScheduled",
            Event::ThresholdBreach { .. } => "ThresholdBreach",
            Event::ResourceQueued { .. } => "ResourceQueued",
            Event::ResourceGranted { .. } => "ResourceGranted",
            Event::Censored { .. } => "Censored",
            Event::RunCompleted { .. } => "RunCompleted",
        }
    }

    /// Patient this event relates to, if any
    pub fn patient_id(&self) -> Option<&str> {
        match self {
            Event::Arrival { patient_id, .. } => Some(patient_id),
            Event::ReferralDeferred { patient_id, .. } => Some(patient_id),
            Event::StageTransition { patient_id, .. } => Some(patient_id),
            Event::EscalationScheduled { patient_id, .. } => Some(patient_id),
            Event::ThresholdBreach { patient_id, .. } => Some(patient_id),
            Event::ResourceQueued { patient_id, .. } => Some(patient_id),
            Event::ResourceGranted { patient_id, .. } => Some(patient_id),
            Event::Censored { patient_id, .. } => Some(patient_id),
            Event::RunCompleted { .. } => None,
        }
    }
}

/// Ordered event log with simple query helpers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event
    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All events in processing order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Events for a specific patient
    pub fn events_for_patient(&self, patient_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.patient_id() == Some(patient_id))
            .collect()
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
