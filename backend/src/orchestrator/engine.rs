//! Hybrid coordinator
//!
//! The central orchestration loop coupling the continuous SD model to the
//! discrete-event pathway model:
//!
//! ```text
//! For each popped event E at time T:
//! 1. Stop if the scheduler is exhausted or the stop condition is reached
//! 2. Pop E, advancing the clock to T
//! 3. Advance the SD state of EVERY waiting patient to T
//! 4. Apply SD side effects: threshold crossings become urgent escalations,
//!    cancelling the patient's planned routine event
//! 5. Process E: resource acquire/release, automaton-driven transition,
//!    stage + automaton state update, history append
//! 6. Schedule the follow-on events implied by the new stage
//! ```
//!
//! Escalation timing is exact: on entry to the waiting stage the coordinator
//! computes the closed-form threshold-crossing time and schedules an
//! `EscalationDue` event there. The per-event sync in step 3/4 additionally
//! catches crossings when the closed form is only an estimate (noise-enabled
//! runs).
//!
//! # Failure policy
//!
//! Configuration and artifact errors are fatal before the run starts. All
//! per-patient runtime failures (automaton dead ends, structurally
//! unsatisfiable resource requests) censor the affected patient and the run
//! continues, so aggregate statistics remain usable under partial failure.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::arrivals::{ArrivalConfig, ReferralGenerator};
use crate::automaton::{DeadEndStateError, MalformedAutomatonError, PdfaSet};
use crate::models::event::{Event, EventLog};
use crate::models::patient::PatientStatus;
use crate::models::stage::{PathwayStage, ESCALATE_SYMBOL, GP_REFERRAL_DECISION, ORTHOPAEDIC_DECISION};
use crate::models::state::SimulationState;
use crate::orchestrator::stats::{PatientHistoryRecord, RunOutput, RunStatistics};
use crate::resources::{Acquisition, QueueDiscipline, ResourcePool};
use crate::rng::RngManager;
use crate::scheduler::{EventKind, EventScheduler};
use crate::sd::{DeteriorationModel, IntegrationMethod, NoiseConfig, SdIntegrator};

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete scenario configuration
///
/// Supplied externally (the surrounding tooling owns the file format); the
/// core validates it fully before the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Simulation horizon in days; survivors are censored here
    pub run_horizon: f64,

    /// RNG seed for deterministic execution
    pub rng_seed: u64,

    /// Cap on generated patients (None = horizon-bound only). Reaching the
    /// cap stops arrival generation; patients already in the system finish
    /// their pathways.
    #[serde(default)]
    pub max_patients: Option<usize>,

    /// Arrival process of new unwell patients
    pub arrivals: ArrivalConfig,

    /// Deterioration law for waiting patients
    pub deterioration: DeteriorationModel,

    /// Score at which a waiting patient is urgently escalated
    pub escalation_threshold: f64,

    /// Numerical integration settings
    pub integration: IntegrationConfig,

    /// Per-day rate at which a waiting patient presents for referral
    pub presenting_rate: f64,

    /// Time spent in each service stage
    pub stage_delays: BTreeMap<PathwayStage, DelayDistribution>,

    /// Resource pool definitions
    pub resources: Vec<ResourceConfig>,

    /// Which pool each stage consumes (stages absent here are unconstrained)
    pub stage_resources: BTreeMap<PathwayStage, String>,
}

/// Numerical integration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    #[serde(default = "default_method")]
    pub method: IntegrationMethod,

    /// Fixed step size in days
    pub step: f64,

    /// Optional stochastic rate perturbation
    #[serde(default)]
    pub noise: Option<NoiseConfig>,
}

fn default_method() -> IntegrationMethod {
    IntegrationMethod::Euler
}

/// One resource pool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub capacity: usize,

    #[serde(default = "default_discipline")]
    pub discipline: QueueDiscipline,
}

fn default_discipline() -> QueueDiscipline {
    QueueDiscipline::Fifo
}

/// Service / transfer time distribution for a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelayDistribution {
    /// Constant delay
    Fixed { value: f64 },

    /// Uniform between min and max
    Uniform { min: f64, max: f64 },

    /// Exponential with the given mean
    Exponential { mean: f64 },
}

impl DelayDistribution {
    /// Structural validation; surfaced as a configuration error before a run
    pub fn validate(&self) -> Result<(), String> {
        match self {
            DelayDistribution::Fixed { value } => {
                if !value.is_finite() || *value < 0.0 {
                    return Err(format!("fixed delay must be finite and >= 0, got {}", value));
                }
            }
            DelayDistribution::Uniform { min, max } => {
                if !(min.is_finite() && max.is_finite()) || *min < 0.0 || max < min {
                    return Err(format!("uniform delay bounds invalid: [{}, {}]", min, max));
                }
            }
            DelayDistribution::Exponential { mean } => {
                if !mean.is_finite() || *mean <= 0.0 {
                    return Err(format!("exponential delay mean must be > 0, got {}", mean));
                }
            }
        }
        Ok(())
    }

    /// Sample one delay
    pub fn sample(&self, rng: &mut RngManager) -> f64 {
        match self {
            DelayDistribution::Fixed { value } => *value,
            DelayDistribution::Uniform { min, max } => min + (max - min) * rng.next_f64(),
            DelayDistribution::Exponential { mean } => rng.exponential(1.0 / mean),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Run-level error types
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// Configuration validation error (fatal, surfaced before run start)
    InvalidConfig(String),

    /// Patient not found
    PatientNotFound(String),

    /// Resource pool not found
    PoolNotFound(String),

    /// Checkpoint does not match the supplied configuration
    CheckpointMismatch(String),

    /// Snapshot (de)serialization error
    SerializationError(String),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            SimulationError::PatientNotFound(id) => write!(f, "Patient not found: {}", id),
            SimulationError::PoolNotFound(name) => write!(f, "Resource pool not found: {}", name),
            SimulationError::CheckpointMismatch(msg) => {
                write!(f, "Checkpoint mismatch: {}", msg)
            }
            SimulationError::SerializationError(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
        }
    }
}

impl std::error::Error for SimulationError {}

impl From<MalformedAutomatonError> for SimulationError {
    fn from(err: MalformedAutomatonError) -> Self {
        SimulationError::InvalidConfig(err.to_string())
    }
}

/// Result of processing one event
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Simulation time of the processed event
    pub time: f64,
    pub kind: EventKind,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// The hybrid SD/DES coordinator
///
/// # Example
///
/// ```rust,ignore
/// use pathway_simulator_core_rs::automaton::PdfaSet;
/// use pathway_simulator_core_rs::orchestrator::{HybridOrchestrator, ScenarioConfig};
///
/// let pdfas = PdfaSet::from_json_str(&std::fs::read_to_string("pdfa.json")?)?;
/// let config: ScenarioConfig = serde_json::from_str(&std::fs::read_to_string("scenario.json")?)?;
///
/// let mut orchestrator = HybridOrchestrator::new(config, pdfas)?;
/// let output = orchestrator.run()?;
/// println!("{} completed, {} censored", output.statistics.completed, output.statistics.censored);
/// ```
pub struct HybridOrchestrator {
    config: ScenarioConfig,
    pdfas: PdfaSet,
    state: SimulationState,
    scheduler: EventScheduler,
    integrator: SdIntegrator,
    generator: ReferralGenerator,
    rng: RngManager,
    event_log: EventLog,
    stats: RunStatistics,
    run_complete: bool,
}

impl HybridOrchestrator {
    /// Create a new orchestrator from a validated configuration and a loaded
    /// automaton set
    ///
    /// Schedules the end-of-run event and, if arrivals are configured, the
    /// first arrival.
    pub fn new(config: ScenarioConfig, pdfas: PdfaSet) -> Result<Self, SimulationError> {
        Self::validate_config(&config, &pdfas)?;

        let pools: Vec<ResourcePool> = config
            .resources
            .iter()
            .map(|rc| ResourcePool::new(rc.name.clone(), rc.capacity, rc.discipline))
            .collect();
        let pool_names: Vec<String> = pools.iter().map(|p| p.name().to_string()).collect();

        let state = SimulationState::new(pools);
        let integrator = SdIntegrator::new(
            config.integration.method,
            config.integration.step,
            config.integration.noise,
        );
        let generator = ReferralGenerator::new(config.arrivals.clone());
        let rng = RngManager::new(config.rng_seed);
        let stats = RunStatistics::new(&pool_names);

        let mut scheduler = EventScheduler::new();
        scheduler.schedule(EventKind::EndOfRun, None, config.run_horizon);
        if config.arrivals.rate_per_day > 0.0 {
            scheduler.schedule(EventKind::Arrival, None, config.arrivals.first_arrival);
        }

        Ok(Self {
            config,
            pdfas,
            state,
            scheduler,
            integrator,
            generator,
            rng,
            event_log: EventLog::new(),
            stats,
            run_complete: false,
        })
    }

    /// Validate configuration against the loaded automata
    fn validate_config(config: &ScenarioConfig, pdfas: &PdfaSet) -> Result<(), SimulationError> {
        if !config.run_horizon.is_finite() || config.run_horizon <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "run_horizon must be > 0".to_string(),
            ));
        }

        if !config.escalation_threshold.is_finite() || config.escalation_threshold <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "escalation_threshold must be > 0".to_string(),
            ));
        }

        if !config.presenting_rate.is_finite() || config.presenting_rate <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "presenting_rate must be > 0".to_string(),
            ));
        }

        if let Some(0) = config.max_patients {
            return Err(SimulationError::InvalidConfig(
                "max_patients must be > 0 when set".to_string(),
            ));
        }

        config
            .deterioration
            .validate()
            .map_err(SimulationError::InvalidConfig)?;
        config
            .arrivals
            .validate()
            .map_err(SimulationError::InvalidConfig)?;

        let step = config.integration.step;
        if !step.is_finite() || step <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "integration step must be > 0".to_string(),
            ));
        }
        // Stability: the step must be small relative to the fastest modelled
        // rate constant
        let stiffness = config.deterioration.stiffness(config.escalation_threshold);
        if stiffness > 0.0 && step * stiffness > 0.5 {
            return Err(SimulationError::InvalidConfig(format!(
                "integration step {} too large for rate constant {} (step * rate must be <= 0.5)",
                step, stiffness
            )));
        }
        if let Some(noise) = &config.integration.noise {
            if !noise.sigma.is_finite() || noise.sigma < 0.0 {
                return Err(SimulationError::InvalidConfig(
                    "noise sigma must be finite and >= 0".to_string(),
                ));
            }
        }

        let mut pool_names = HashSet::new();
        for rc in &config.resources {
            if !pool_names.insert(rc.name.as_str()) {
                return Err(SimulationError::InvalidConfig(format!(
                    "duplicate resource pool: {}",
                    rc.name
                )));
            }
        }
        for (stage, pool) in &config.stage_resources {
            if stage.is_terminal() || *stage == PathwayStage::AwaitingReferral {
                return Err(SimulationError::InvalidConfig(format!(
                    "stage {} cannot consume a resource",
                    stage
                )));
            }
            if !pool_names.contains(pool.as_str()) {
                return Err(SimulationError::InvalidConfig(format!(
                    "stage {} references undeclared pool {}",
                    stage, pool
                )));
            }
        }

        // Every service stage the automata can route to needs a delay
        for stage in [
            PathwayStage::OutpatientClinic,
            PathwayStage::Diagnostics,
            PathwayStage::Surgery,
            PathwayStage::Recovery,
            PathwayStage::FollowUp,
        ] {
            match config.stage_delays.get(&stage) {
                Some(delay) => delay.validate().map_err(SimulationError::InvalidConfig)?,
                None => {
                    return Err(SimulationError::InvalidConfig(format!(
                        "missing stage delay for {}",
                        stage
                    )))
                }
            }
        }

        for decision_point in [GP_REFERRAL_DECISION, ORTHOPAEDIC_DECISION] {
            if !pdfas.contains(decision_point) {
                return Err(SimulationError::InvalidConfig(format!(
                    "artifact missing decision point '{}'",
                    decision_point
                )));
            }
        }

        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current simulation time
    pub fn current_time(&self) -> f64 {
        self.scheduler.now()
    }

    /// Whether the run has reached its stop condition
    pub fn is_complete(&self) -> bool {
        self.run_complete
    }

    /// Reference to the simulation state
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Reference to the event log
    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Reference to the accumulated statistics
    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    /// Scenario configuration
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub(crate) fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub(crate) fn rng(&self) -> &RngManager {
        &self.rng
    }

    pub(crate) fn generator(&self) -> &ReferralGenerator {
        &self.generator
    }

    /// Rebuild an orchestrator from checkpointed parts
    pub(crate) fn from_parts(
        config: ScenarioConfig,
        pdfas: PdfaSet,
        state: SimulationState,
        scheduler: EventScheduler,
        generator: ReferralGenerator,
        rng: RngManager,
        stats: RunStatistics,
    ) -> Self {
        let integrator = SdIntegrator::new(
            config.integration.method,
            config.integration.step,
            config.integration.noise,
        );
        Self {
            config,
            pdfas,
            state,
            scheduler,
            integrator,
            generator,
            rng,
            event_log: EventLog::new(),
            stats,
            run_complete: false,
        }
    }

    fn log_event(&mut self, event: Event) {
        self.event_log.log(event);
    }

    // ========================================================================
    // Main loop
    // ========================================================================

    /// Run to completion and produce the output
    pub fn run(&mut self) -> Result<RunOutput, SimulationError> {
        while self.step()?.is_some() {}
        Ok(self.output())
    }

    /// Process one event
    ///
    /// Returns `Ok(None)` once the run is complete (queue exhausted or stop
    /// condition reached).
    pub fn step(&mut self) -> Result<Option<StepResult>, SimulationError> {
        if self.run_complete {
            return Ok(None);
        }

        let event = match self.scheduler.pop_next() {
            Ok(event) => event,
            Err(_) => {
                // Queue exhausted: normal termination
                self.finish(self.scheduler.now());
                return Ok(None);
            }
        };
        let time = event.time;

        // Step 3: no waiting patient's SD state may lag the clock
        self.sync_waiting(time);

        // Step 4: SD side effects (threshold crossings escalate immediately)
        self.apply_threshold_crossings(time)?;

        // Steps 5-6
        match event.kind {
            EventKind::Arrival => self.handle_arrival(time)?,
            EventKind::StageComplete => {
                let patient_id = event
                    .patient_id
                    .ok_or_else(|| SimulationError::PatientNotFound("<missing>".to_string()))?;
                self.handle_stage_complete(time, &patient_id)?;
            }
            EventKind::EscalationDue => {
                let patient_id = event
                    .patient_id
                    .ok_or_else(|| SimulationError::PatientNotFound("<missing>".to_string()))?;
                self.escalate_patient(time, &patient_id)?;
            }
            EventKind::ResourceGranted => {
                let patient_id = event
                    .patient_id
                    .ok_or_else(|| SimulationError::PatientNotFound("<missing>".to_string()))?;
                self.handle_resource_granted(time, &patient_id)?;
            }
            EventKind::EndOfRun => {
                self.handle_end_of_run(time)?;
                return Ok(Some(StepResult {
                    time,
                    kind: EventKind::EndOfRun,
                }));
            }
        }

        self.sample_queue_lengths(time);

        Ok(Some(StepResult {
            time,
            kind: event.kind,
        }))
    }

    /// Advance the SD state of every waiting patient to `time`
    fn sync_waiting(&mut self, time: f64) {
        let waiting: Vec<String> = self.state.waiting_ids().to_vec();
        for patient_id in waiting {
            if let Some(patient) = self.state.get_patient_mut(&patient_id) {
                self.integrator.advance(
                    &self.config.deterioration,
                    patient.sd_mut(),
                    time,
                    &mut self.rng,
                );
            }
        }
    }

    /// Escalate every waiting patient whose score has crossed the threshold
    fn apply_threshold_crossings(&mut self, time: f64) -> Result<(), SimulationError> {
        let threshold = self.config.escalation_threshold;
        let crossed: Vec<String> = self
            .state
            .waiting_ids()
            .iter()
            .filter(|id| {
                self.state
                    .get_patient(id)
                    .map(|p| !p.escalated() && p.sd().score >= threshold)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for patient_id in crossed {
            self.escalate_patient(time, &patient_id)?;
        }
        Ok(())
    }

    // ========================================================================
    // Event handlers
    // ========================================================================

    /// A new patient arrives into the waiting population
    fn handle_arrival(&mut self, time: f64) -> Result<(), SimulationError> {
        let cap_reached = self
            .config
            .max_patients
            .map_or(false, |cap| self.generator.num_generated() >= cap);
        if cap_reached {
            return Ok(());
        }

        // Draw order per arrival: band, presentation gap, next arrival gap
        let patient = self
            .generator
            .create_patient(time, self.pdfas.initial_states(), &mut self.rng);
        let patient_id = patient.id().to_string();
        let band = patient.band();
        let initial_score = patient.sd().score;
        self.state.add_patient(patient);

        self.log_event(Event::Arrival {
            time,
            patient_id: patient_id.clone(),
            band,
        });

        // Presentation for referral
        let presentation = time + self.rng.exponential(self.config.presenting_rate);
        let handle = self
            .scheduler
            .schedule(EventKind::StageComplete, Some(patient_id.clone()), presentation);
        if let Some(patient) = self.state.get_patient_mut(&patient_id) {
            patient.set_pending_event(Some(handle));
        }

        // Escalation check at the closed-form crossing time
        let crossing = self
            .config
            .deterioration
            .crossing_time(initial_score, time, self.config.escalation_threshold);
        if let Some(due) = crossing {
            if due <= self.config.run_horizon {
                let handle =
                    self.scheduler
                        .schedule(EventKind::EscalationDue, Some(patient_id.clone()), due);
                if let Some(patient) = self.state.get_patient_mut(&patient_id) {
                    patient.set_escalation_event(Some(handle));
                }
                self.log_event(Event::EscalationScheduled {
                    time,
                    patient_id: patient_id.clone(),
                    due,
                });
            }
        }

        // Keep the arrival process going while the cap allows
        let cap_reached = self
            .config
            .max_patients
            .map_or(false, |cap| self.generator.num_generated() >= cap);
        if !cap_reached {
            if let Some(next) = self.generator.next_arrival_time(time, &mut self.rng) {
                if next <= self.config.run_horizon {
                    self.scheduler.schedule(EventKind::Arrival, None, next);
                }
            }
        }

        Ok(())
    }

    /// The patient's current stage has finished
    fn handle_stage_complete(&mut self, time: f64, patient_id: &str) -> Result<(), SimulationError> {
        let (active, stage) = {
            let patient = self
                .state
                .get_patient(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?;
            (patient.is_active(), patient.stage())
        };
        if !active {
            // Stale event for an already-terminated patient
            return Ok(());
        }

        if let Some(patient) = self.state.get_patient_mut(patient_id) {
            patient.set_pending_event(None);
        }

        match stage {
            PathwayStage::AwaitingReferral => self.handle_presentation(time, patient_id),
            stage => self.handle_service_complete(time, patient_id, stage),
        }
    }

    /// A waiting patient presents for referral; gatekeeping may defer them
    fn handle_presentation(&mut self, time: f64, patient_id: &str) -> Result<(), SimulationError> {
        if let Some(policy) = &self.config.arrivals.gatekeeping {
            let stocks = self.state.stocks();
            let population: f64 = stocks.iter().sum();
            let band = self
                .state
                .get_patient(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?
                .band();

            let demand = self.config.presenting_rate * stocks[band.index()];
            let allowed =
                policy.allowed_rates(stocks, population, self.config.presenting_rate, time)[band.index()];
            let accept_probability = if demand > 0.0 { (allowed / demand).min(1.0) } else { 1.0 };

            if accept_probability < 1.0 && self.rng.next_f64() >= accept_probability {
                // Deferred: try again after another presentation gap
                let retry = time + self.rng.exponential(self.config.presenting_rate);
                let handle = self.scheduler.schedule(
                    EventKind::StageComplete,
                    Some(patient_id.to_string()),
                    retry,
                );
                if let Some(patient) = self.state.get_patient_mut(patient_id) {
                    patient.set_pending_event(Some(handle));
                }
                self.stats.deferrals += 1;
                self.log_event(Event::ReferralDeferred {
                    time,
                    patient_id: patient_id.to_string(),
                });
                return Ok(());
            }
        }

        // Referral granted: the escalation check no longer applies
        let (escalation_handle, arrival_time) = {
            let patient = self
                .state
                .get_patient_mut(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?;
            patient.mark_referred(time);
            (patient.take_escalation_event(), patient.arrival_time())
        };
        if let Some(handle) = escalation_handle {
            self.scheduler.cancel(handle);
        }
        self.state.remove_from_waiting(patient_id);
        self.stats.record_referral_wait(time - arrival_time);

        self.sample_and_apply(time, patient_id, GP_REFERRAL_DECISION)
    }

    /// A service stage has finished: release its resource, sample onwards
    fn handle_service_complete(
        &mut self,
        time: f64,
        patient_id: &str,
        stage: PathwayStage,
    ) -> Result<(), SimulationError> {
        if let Some(pool_name) = self.config.stage_resources.get(&stage).cloned() {
            let granted = self
                .state
                .pool_mut(&pool_name)
                .ok_or_else(|| SimulationError::PoolNotFound(pool_name.clone()))?
                .release();
            if let Some(next_patient) = granted {
                // The freed unit already belongs to this waiter; the event
                // just resumes their pathway at the current time
                self.scheduler
                    .schedule(EventKind::ResourceGranted, Some(next_patient), time);
            }
        }

        let decision_point = stage
            .decision_point()
            .expect("service stages always have a decision point");
        self.sample_and_apply(time, patient_id, decision_point)
    }

    /// A queued patient now holds a resource unit: begin service
    fn handle_resource_granted(&mut self, time: f64, patient_id: &str) -> Result<(), SimulationError> {
        let (active, stage, waited) = {
            let patient = self
                .state
                .get_patient_mut(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?;
            let waited = patient.end_resource_wait(time);
            (patient.is_active(), patient.stage(), waited)
        };
        if !active {
            return Ok(());
        }

        if let Some(pool_name) = self.config.stage_resources.get(&stage) {
            let waited = waited.unwrap_or(0.0);
            self.stats.record_resource_wait(pool_name, waited);
            self.log_event(Event::ResourceGranted {
                time,
                patient_id: patient_id.to_string(),
                pool: pool_name.clone(),
                waited,
            });
        }

        self.schedule_stage_completion(time, patient_id, stage)
    }

    /// Censor everyone still active and stop
    fn handle_end_of_run(&mut self, time: f64) -> Result<(), SimulationError> {
        for patient_id in self.state.active_ids_sorted() {
            self.censor_patient(time, &patient_id, "simulation end")?;
        }
        self.finish(time);
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Sample the next transition for a patient at a decision point and apply
    /// it; a dead end censors the patient instead of failing the run
    fn sample_and_apply(
        &mut self,
        time: f64,
        patient_id: &str,
        decision_point: &str,
    ) -> Result<(), SimulationError> {
        let node = self
            .state
            .get_patient(patient_id)
            .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?
            .automaton_state(decision_point)
            .ok_or_else(|| {
                SimulationError::InvalidConfig(format!(
                    "patient {} has no automaton state for '{}'",
                    patient_id, decision_point
                ))
            })?;

        let sampled: Result<(String, PathwayStage, usize), DeadEndStateError> = {
            let pdfa = self.pdfas.get(decision_point).ok_or_else(|| {
                SimulationError::InvalidConfig(format!(
                    "no automaton for decision point '{}'",
                    decision_point
                ))
            })?;
            let draw = self.rng.next_f64();
            pdfa.sample_next(node, draw)
                .map(|t| (t.symbol.to_string(), t.stage, t.next_state))
        };

        match sampled {
            Ok((symbol, stage, next_state)) => {
                self.apply_transition(time, patient_id, decision_point, &symbol, stage, next_state)
            }
            Err(dead_end) => self.censor_patient(time, patient_id, &dead_end.to_string()),
        }
    }

    /// Apply a (sampled or forced) automaton transition: stage change,
    /// history append, follow-on scheduling
    fn apply_transition(
        &mut self,
        time: f64,
        patient_id: &str,
        decision_point: &str,
        symbol: &str,
        stage: PathwayStage,
        next_state: usize,
    ) -> Result<(), SimulationError> {
        let from = {
            let patient = self
                .state
                .get_patient_mut(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?;
            let from = patient.stage();
            patient.apply_transition(decision_point, next_state, stage, time);
            if stage == PathwayStage::Escalated {
                patient.mark_escalated();
            }
            if stage == PathwayStage::Surgery {
                patient.mark_admitted(time);
            }
            from
        };

        self.log_event(Event::StageTransition {
            time,
            patient_id: patient_id.to_string(),
            from,
            to: stage,
            symbol: symbol.to_string(),
        });

        if stage.is_terminal() {
            return Ok(());
        }
        self.enter_service(time, patient_id, stage)
    }

    /// Enter a service stage: acquire its resource (or queue), then schedule
    /// the completion event
    fn enter_service(
        &mut self,
        time: f64,
        patient_id: &str,
        stage: PathwayStage,
    ) -> Result<(), SimulationError> {
        if let Some(pool_name) = self.config.stage_resources.get(&stage).cloned() {
            let priority = self
                .state
                .get_patient(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?
                .band()
                .priority();

            let outcome = {
                let pool = self
                    .state
                    .pool_mut(&pool_name)
                    .ok_or_else(|| SimulationError::PoolNotFound(pool_name.clone()))?;
                pool.acquire(patient_id, priority)
            };

            match outcome {
                Ok(Acquisition::Granted) => {}
                Ok(Acquisition::Queued { .. }) => {
                    let queue_len = self
                        .state
                        .pool(&pool_name)
                        .map(|p| p.queue_len())
                        .unwrap_or(0);
                    if let Some(patient) = self.state.get_patient_mut(patient_id) {
                        patient.begin_resource_wait(time);
                    }
                    self.log_event(Event::ResourceQueued {
                        time,
                        patient_id: patient_id.to_string(),
                        pool: pool_name,
                        queue_len,
                    });
                    // Waiting = no scheduled event; release() will wake them
                    return Ok(());
                }
                Err(deadlock) => {
                    return self.censor_patient(time, patient_id, &deadlock.to_string());
                }
            }
        }

        self.schedule_stage_completion(time, patient_id, stage)
    }

    /// Schedule the completion of the patient's current stage
    fn schedule_stage_completion(
        &mut self,
        time: f64,
        patient_id: &str,
        stage: PathwayStage,
    ) -> Result<(), SimulationError> {
        let delay = self
            .config
            .stage_delays
            .get(&stage)
            .ok_or_else(|| {
                SimulationError::InvalidConfig(format!("missing stage delay for {}", stage))
            })?
            .sample(&mut self.rng);

        let handle = self.scheduler.schedule(
            EventKind::StageComplete,
            Some(patient_id.to_string()),
            time + delay,
        );
        if let Some(patient) = self.state.get_patient_mut(patient_id) {
            patient.set_pending_event(Some(handle));
        }
        Ok(())
    }

    /// Urgent escalation: the principal SD-to-DES coupling
    ///
    /// Idempotent per patient; stale escalation events (after referral or a
    /// prior escalation) are no-ops.
    fn escalate_patient(&mut self, time: f64, patient_id: &str) -> Result<(), SimulationError> {
        let (score, node, pending, escalation) = {
            let patient = self
                .state
                .get_patient_mut(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?;
            if !patient.is_waiting() || patient.escalated() {
                // Stale check: the patient was referred or already escalated
                return Ok(());
            }
            patient.mark_escalated();
            (
                patient.sd().score,
                patient.automaton_state(GP_REFERRAL_DECISION),
                patient.take_pending_event(),
                patient.take_escalation_event(),
            )
        };

        // Escalation pre-empts the planned routine event
        if let Some(handle) = pending {
            self.scheduler.cancel(handle);
        }
        if let Some(handle) = escalation {
            self.scheduler.cancel(handle);
        }
        self.state.remove_from_waiting(patient_id);
        self.stats.threshold_breaches += 1;

        self.log_event(Event::ThresholdBreach {
            time,
            patient_id: patient_id.to_string(),
            score,
            threshold: self.config.escalation_threshold,
        });

        // Forced transition through the governing automaton, so even an
        // SD-triggered stage change is a valid automaton edge
        let node = node.ok_or_else(|| {
            SimulationError::InvalidConfig(format!(
                "patient {} has no automaton state for '{}'",
                patient_id, GP_REFERRAL_DECISION
            ))
        })?;
        let forced = {
            let pdfa = self.pdfas.get(GP_REFERRAL_DECISION).ok_or_else(|| {
                SimulationError::InvalidConfig(format!(
                    "no automaton for decision point '{}'",
                    GP_REFERRAL_DECISION
                ))
            })?;
            pdfa.follow_symbol(node, ESCALATE_SYMBOL)
                .map(|t| (t.symbol.to_string(), t.stage, t.next_state))
        };

        match forced {
            Some((symbol, stage, next_state)) => self.apply_transition(
                time,
                patient_id,
                GP_REFERRAL_DECISION,
                &symbol,
                stage,
                next_state,
            ),
            None => self.censor_patient(
                time,
                patient_id,
                "no escalate edge at current automaton state",
            ),
        }
    }

    /// Forcibly terminate one patient's pathway; the run continues
    fn censor_patient(
        &mut self,
        time: f64,
        patient_id: &str,
        reason: &str,
    ) -> Result<(), SimulationError> {
        let (was_waiting, stage, pending, escalation) = {
            let patient = self
                .state
                .get_patient_mut(patient_id)
                .ok_or_else(|| SimulationError::PatientNotFound(patient_id.to_string()))?;
            if !patient.is_active() {
                return Ok(());
            }
            let was_waiting = patient.is_waiting();
            let stage = patient.stage();
            let pending = patient.take_pending_event();
            let escalation = patient.take_escalation_event();
            patient.censor(time);
            (was_waiting, stage, pending, escalation)
        };

        if let Some(handle) = pending {
            self.scheduler.cancel(handle);
        }
        if let Some(handle) = escalation {
            self.scheduler.cancel(handle);
        }
        if was_waiting {
            self.state.remove_from_waiting(patient_id);
        }
        // Drop any queued resource request so the spot is not granted to a
        // censored patient
        if let Some(pool_name) = self.config.stage_resources.get(&stage).cloned() {
            if let Some(pool) = self.state.pool_mut(&pool_name) {
                pool.remove_waiter(patient_id);
            }
        }

        self.log_event(Event::Censored {
            time,
            patient_id: patient_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    fn sample_queue_lengths(&mut self, time: f64) {
        for name in self.state.pool_names_sorted() {
            let length = self.state.pool(&name).map(|p| p.queue_len()).unwrap_or(0);
            self.stats.record_queue_length(&name, time, length);
        }
    }

    fn finish(&mut self, time: f64) {
        if self.run_complete {
            return;
        }
        let mut completed = 0;
        let mut censored = 0;
        for patient in self.state.patients() {
            match patient.status() {
                PatientStatus::Completed => completed += 1,
                PatientStatus::Censored => censored += 1,
                PatientStatus::Active => {}
            }
        }
        self.stats.completed = completed;
        self.stats.censored = censored;

        self.log_event(Event::RunCompleted {
            time,
            completed,
            censored,
        });
        self.scheduler.complete();
        self.run_complete = true;
    }

    /// Build the run output (histories sorted by patient id)
    pub fn output(&self) -> RunOutput {
        let mut histories: Vec<PatientHistoryRecord> = self
            .state
            .patients()
            .map(|p| PatientHistoryRecord {
                patient_id: p.id().to_string(),
                band: p.band(),
                status: p.status(),
                arrival_time: p.arrival_time(),
                referral_time: p.referral_time(),
                admission_time: p.admission_time(),
                final_score: p.sd().score,
                records: p.history().to_vec(),
            })
            .collect();
        histories.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));

        RunOutput {
            run_id: RunOutput::run_id_for_seed(self.config.rng_seed),
            seed: self.config.rng_seed,
            end_time: self.scheduler.now(),
            histories,
            statistics: self.stats.clone(),
        }
    }
}
