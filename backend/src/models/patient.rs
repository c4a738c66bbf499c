//! Patient model
//!
//! A patient couples three kinds of state:
//! - continuous SD state (deterioration score), mutated only by the
//!   integrator;
//! - discrete DES state (pathway stage), mutated only by the coordinator
//!   after a successful automaton sample;
//! - automaton state per decision point (current PDFA node index).
//!
//! History is append-only: one record per stage entered, in order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::stage::PathwayStage;
use crate::scheduler::EventHandle;
use crate::sd::SdState;

/// Severity band of the waiting population, most severe first
///
/// Bands double as the stocks of the population-level SD view: gatekeeping
/// hands referral capacity out most-severe-first, and the severity queue
/// discipline prioritises by band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityBand {
    Severe,
    Moderate,
    Mild,
}

impl SeverityBand {
    /// All bands in stock order (most severe first)
    pub const ALL: [SeverityBand; 3] = [
        SeverityBand::Severe,
        SeverityBand::Moderate,
        SeverityBand::Mild,
    ];

    /// Stock index (0 = most severe)
    pub fn index(&self) -> usize {
        match self {
            SeverityBand::Severe => 0,
            SeverityBand::Moderate => 1,
            SeverityBand::Mild => 2,
        }
    }

    /// Queueing priority; higher is served first
    pub fn priority(&self) -> u8 {
        match self {
            SeverityBand::Severe => 2,
            SeverityBand::Moderate => 1,
            SeverityBand::Mild => 0,
        }
    }
}

/// Patient lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientStatus {
    /// Still moving through the pathway
    Active,
    /// Reached a terminal stage normally (discharged or escalated)
    Completed,
    /// Forcibly terminated (dead end, deadlock, or run end)
    Censored,
}

/// One entry of the append-only stage history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: PathwayStage,
    pub time: f64,
}

/// A patient moving through the referral pathway
///
/// # Mutator contract
///
/// Fields are private; the accessor/mutator split enforces who may touch
/// what. `sd_mut` is for the integrator, `apply_transition`/`censor` for the
/// coordinator. History cannot be rewritten, only appended.
///
/// # Example
/// ```
/// use std::collections::HashMap;
/// use pathway_simulator_core_rs::models::{Patient, PathwayStage, SeverityBand};
///
/// let patient = Patient::new(
///     "pt_00000000".to_string(),
///     SeverityBand::Moderate,
///     0.0,
///     0.0,
///     HashMap::new(),
/// );
/// assert_eq!(patient.stage(), PathwayStage::AwaitingReferral);
/// assert_eq!(patient.history().len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    /// Unique identifier ("pt_00000042")
    id: String,

    /// Severity band assigned at arrival
    band: SeverityBand,

    /// Continuous deterioration state (integrator-owned)
    sd: SdState,

    /// Current pathway stage (coordinator-owned)
    stage: PathwayStage,

    /// Current automaton node per decision point (coordinator-owned)
    automaton_states: HashMap<String, usize>,

    /// Append-only (stage, time) history
    history: Vec<StageRecord>,

    arrival_time: f64,
    referral_time: Option<f64>,
    admission_time: Option<f64>,

    status: PatientStatus,

    /// Whether this patient's one-shot urgent escalation has fired
    escalated: bool,

    /// Handle of the pending routine event, if one is scheduled
    pending_event: Option<EventHandle>,

    /// Handle of the pending escalation check, if one is scheduled
    escalation_event: Option<EventHandle>,

    /// When the patient joined a resource queue (for wait statistics)
    wait_started: Option<f64>,
}

impl Patient {
    /// Create a patient entering the waiting population at `arrival_time`
    ///
    /// `automaton_states` must hold the initial node of every decision-point
    /// automaton (see `PdfaSet::initial_states`).
    pub fn new(
        id: String,
        band: SeverityBand,
        initial_score: f64,
        arrival_time: f64,
        automaton_states: HashMap<String, usize>,
    ) -> Self {
        Self {
            id,
            band,
            sd: SdState::new(initial_score, arrival_time),
            stage: PathwayStage::AwaitingReferral,
            automaton_states,
            history: vec![StageRecord {
                stage: PathwayStage::AwaitingReferral,
                time: arrival_time,
            }],
            arrival_time,
            referral_time: None,
            admission_time: None,
            status: PatientStatus::Active,
            escalated: false,
            pending_event: None,
            escalation_event: None,
            wait_started: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn band(&self) -> SeverityBand {
        self.band
    }

    pub fn stage(&self) -> PathwayStage {
        self.stage
    }

    pub fn status(&self) -> PatientStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == PatientStatus::Active
    }

    /// Whether the patient is still in the waiting population (SD-coupled)
    pub fn is_waiting(&self) -> bool {
        self.is_active() && self.stage == PathwayStage::AwaitingReferral
    }

    pub fn sd(&self) -> &SdState {
        &self.sd
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    pub fn arrival_time(&self) -> f64 {
        self.arrival_time
    }

    pub fn referral_time(&self) -> Option<f64> {
        self.referral_time
    }

    pub fn admission_time(&self) -> Option<f64> {
        self.admission_time
    }

    pub fn escalated(&self) -> bool {
        self.escalated
    }

    /// Current automaton node for a decision point
    pub fn automaton_state(&self, decision_point: &str) -> Option<usize> {
        self.automaton_states.get(decision_point).copied()
    }

    // ========================================================================
    // Integrator interface
    // ========================================================================

    /// Mutable SD state
    ///
    /// Reserved for the SD integrator; everything else reads via [`sd`](Self::sd).
    pub fn sd_mut(&mut self) -> &mut SdState {
        &mut self.sd
    }

    /// Clinical reset of the deterioration score (admission)
    pub fn reset_deterioration(&mut self, at: f64) {
        self.sd.reset(0.0, at);
    }

    // ========================================================================
    // Coordinator interface
    // ========================================================================

    /// Apply a successful automaton transition: advance the decision point's
    /// node, enter the new stage, append to history
    pub fn apply_transition(
        &mut self,
        decision_point: &str,
        next_state: usize,
        stage: PathwayStage,
        time: f64,
    ) {
        self.automaton_states
            .insert(decision_point.to_string(), next_state);
        self.enter_stage(stage, time);
    }

    /// Force the patient into the censored terminal stage
    pub fn censor(&mut self, time: f64) {
        self.enter_stage(PathwayStage::Censored, time);
    }

    fn enter_stage(&mut self, stage: PathwayStage, time: f64) {
        self.stage = stage;
        self.history.push(StageRecord { stage, time });
        if stage == PathwayStage::Censored {
            self.status = PatientStatus::Censored;
        } else if stage.is_terminal() {
            self.status = PatientStatus::Completed;
        }
    }

    /// Record the moment the referral was granted
    pub fn mark_referred(&mut self, time: f64) {
        self.referral_time = Some(time);
    }

    /// Record the moment of admission; resets the deterioration score
    pub fn mark_admitted(&mut self, time: f64) {
        self.admission_time = Some(time);
        self.reset_deterioration(time);
    }

    /// Mark the one-shot escalation as fired
    pub fn mark_escalated(&mut self) {
        self.escalated = true;
    }

    // ========================================================================
    // Event bookkeeping
    // ========================================================================

    pub fn pending_event(&self) -> Option<EventHandle> {
        self.pending_event
    }

    pub fn set_pending_event(&mut self, handle: Option<EventHandle>) {
        self.pending_event = handle;
    }

    /// Take the pending routine event handle, leaving `None`
    pub fn take_pending_event(&mut self) -> Option<EventHandle> {
        self.pending_event.take()
    }

    pub fn escalation_event(&self) -> Option<EventHandle> {
        self.escalation_event
    }

    pub fn set_escalation_event(&mut self, handle: Option<EventHandle>) {
        self.escalation_event = handle;
    }

    /// Take the pending escalation handle, leaving `None`
    pub fn take_escalation_event(&mut self) -> Option<EventHandle> {
        self.escalation_event.take()
    }

    /// Record entry into a resource queue
    pub fn begin_resource_wait(&mut self, time: f64) {
        self.wait_started = Some(time);
    }

    /// Record exit from a resource queue, returning the wait duration
    pub fn end_resource_wait(&mut self, time: f64) -> Option<f64> {
        self.wait_started.take().map(|started| time - started)
    }
}
