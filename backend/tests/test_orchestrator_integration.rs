//! Orchestrator integration tests
//!
//! End-to-end runs of the hybrid loop: the closed-form escalation scenario,
//! replay determinism, censoring recovery, and resource-constrained flow.

use std::collections::BTreeMap;

use pathway_simulator_core_rs::{
    ArrivalConfig, DelayDistribution, DeteriorationModel, HybridOrchestrator, IntegrationConfig,
    IntegrationMethod, PathwayStage, PatientStatus, PdfaSet, QueueDiscipline, ResourceConfig,
    ScenarioConfig, SimulationError,
};

fn pathway_artifact() -> PdfaSet {
    PdfaSet::from_json_str(
        r#"{
        "decision_points": [
            {
                "name": "gp_referral",
                "states": [{"name": "q0"}, {"name": "q1", "accepting": true}],
                "initial": "q0",
                "edges": [
                    {"from": "q0", "symbol": "clinic", "probability": 0.9, "to": "q1"},
                    {"from": "q0", "symbol": "escalate", "probability": 0.1, "to": "q1"}
                ]
            },
            {
                "name": "orthopaedic",
                "states": [
                    {"name": "r0"}, {"name": "r1"}, {"name": "r2"}, {"name": "r3"},
                    {"name": "done", "accepting": true}
                ],
                "initial": "r0",
                "edges": [
                    {"from": "r0", "symbol": "diagnostics", "probability": 0.6, "to": "r1"},
                    {"from": "r0", "symbol": "surgery", "probability": 0.4, "to": "r2"},
                    {"from": "r1", "symbol": "surgery", "probability": 1.0, "to": "r2"},
                    {"from": "r2", "symbol": "recovery", "probability": 1.0, "to": "r3"},
                    {"from": "r3", "symbol": "discharge", "probability": 0.7, "to": "done"},
                    {"from": "r3", "symbol": "follow_up", "probability": 0.3, "to": "r3"}
                ]
            }
        ]
    }"#,
    )
    .unwrap()
}

fn delays() -> BTreeMap<PathwayStage, DelayDistribution> {
    BTreeMap::from([
        (PathwayStage::OutpatientClinic, DelayDistribution::Fixed { value: 0.1 }),
        (PathwayStage::Diagnostics, DelayDistribution::Fixed { value: 0.2 }),
        (PathwayStage::Surgery, DelayDistribution::Fixed { value: 0.3 }),
        (PathwayStage::Recovery, DelayDistribution::Fixed { value: 2.0 }),
        (PathwayStage::FollowUp, DelayDistribution::Fixed { value: 1.0 }),
    ])
}

fn base_config() -> ScenarioConfig {
    ScenarioConfig {
        run_horizon: 1000.0,
        rng_seed: 42,
        max_patients: Some(5),
        arrivals: ArrivalConfig {
            rate_per_day: 1.0,
            band_splits: [0.2, 0.3, 0.5],
            initial_scores: [0.5, 0.25, 0.0],
            first_arrival: 0.0,
            gatekeeping: None,
        },
        deterioration: DeteriorationModel::Linear { rate: 0.01 },
        escalation_threshold: 1000.0,
        integration: IntegrationConfig {
            method: IntegrationMethod::Euler,
            step: 0.25,
            noise: None,
        },
        presenting_rate: 0.5,
        stage_delays: delays(),
        resources: vec![
            ResourceConfig {
                name: "clinic_slots".to_string(),
                capacity: 2,
                discipline: QueueDiscipline::Fifo,
            },
            ResourceConfig {
                name: "theatre_sessions".to_string(),
                capacity: 1,
                discipline: QueueDiscipline::Severity,
            },
        ],
        stage_resources: BTreeMap::from([
            (PathwayStage::OutpatientClinic, "clinic_slots".to_string()),
            (PathwayStage::Surgery, "theatre_sessions".to_string()),
        ]),
    }
}

// ============================================================================
// Closed-form escalation scenario
// ============================================================================

/// One patient arriving at t=0 under a linear rate of 0.2/day and a threshold
/// of 1.0 crosses at exactly t=5: the escalation event fires there, the
/// patient reaches a terminal stage, and the history is exactly two records.
#[test]
fn test_escalation_at_closed_form_crossing_time() {
    let mut config = base_config();
    config.max_patients = Some(1);
    config.run_horizon = 10.0;
    config.deterioration = DeteriorationModel::Linear { rate: 0.2 };
    config.escalation_threshold = 1.0;
    // All arrivals mild with score 0; presentations effectively never fire
    config.arrivals.band_splits = [0.0, 0.0, 1.0];
    config.arrivals.initial_scores = [0.0, 0.0, 0.0];
    config.presenting_rate = 1e-9;

    let mut orchestrator = HybridOrchestrator::new(config, pathway_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    // The escalation check was scheduled at exactly the crossing time
    let scheduled = orchestrator.event_log().events_of_type("EscalationScheduled");
    assert_eq!(scheduled.len(), 1);
    match scheduled[0] {
        pathway_simulator_core_rs::Event::EscalationScheduled { due, .. } => {
            assert_eq!(*due, 5.0);
        }
        _ => unreachable!(),
    }

    // The breach fired at t=5 and terminated the pathway
    assert_eq!(output.statistics.threshold_breaches, 1);
    assert_eq!(output.statistics.completed, 1);
    assert_eq!(output.statistics.censored, 0);

    assert_eq!(output.histories.len(), 1);
    let history = &output.histories[0];
    assert_eq!(history.status, PatientStatus::Completed);
    assert_eq!(history.records.len(), 2, "expected initial wait + escalation only");
    assert_eq!(history.records[0].stage, PathwayStage::AwaitingReferral);
    assert_eq!(history.records[0].time, 0.0);
    assert_eq!(history.records[1].stage, PathwayStage::Escalated);
    assert_eq!(history.records[1].time, 5.0);
}

// ============================================================================
// Replay determinism
// ============================================================================

#[test]
fn test_fixed_seed_reproduces_run_exactly() {
    let run = |seed: u64| {
        let mut config = base_config();
        config.rng_seed = seed;
        config.max_patients = Some(10);
        config.escalation_threshold = 2.0;
        config.deterioration = DeteriorationModel::Linear { rate: 0.05 };
        config.run_horizon = 60.0;

        let mut orchestrator = HybridOrchestrator::new(config, pathway_artifact()).unwrap();
        let output = orchestrator.run().unwrap();
        let log = orchestrator.event_log().clone();
        (output, log)
    };

    let (out1, log1) = run(42);
    let (out2, log2) = run(42);

    assert_eq!(log1, log2, "event order must be identical for identical seeds");
    assert_eq!(out1, out2);
    assert_eq!(
        serde_json::to_string(&out1).unwrap(),
        serde_json::to_string(&out2).unwrap(),
        "serialized outputs must be byte-identical"
    );

    let (out3, _) = run(43);
    assert_ne!(
        serde_json::to_string(&out1).unwrap(),
        serde_json::to_string(&out3).unwrap(),
        "different seeds should diverge"
    );
}

// ============================================================================
// Censoring recovery
// ============================================================================

fn dead_end_artifact() -> PdfaSet {
    PdfaSet::from_json_str(
        r#"{
        "decision_points": [
            {
                "name": "gp_referral",
                "states": [{"name": "q0"}, {"name": "q1", "accepting": true}],
                "initial": "q0",
                "edges": [
                    {"from": "q0", "symbol": "clinic", "probability": 1.0, "to": "q1"}
                ]
            },
            {
                "name": "orthopaedic",
                "states": [{"name": "r0"}, {"name": "stuck"}],
                "initial": "r0",
                "edges": [
                    {"from": "r0", "symbol": "diagnostics", "probability": 1.0, "to": "stuck"}
                ]
            }
        ]
    }"#,
    )
    .unwrap()
}

/// A reachable dead-end state censors the affected patient; the run completes
/// and still produces statistics.
#[test]
fn test_dead_end_censors_patient_not_run() {
    let mut config = base_config();
    config.max_patients = Some(1);
    config.run_horizon = 100.0;
    config.presenting_rate = 20.0;

    let mut orchestrator = HybridOrchestrator::new(config, dead_end_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    assert_eq!(output.statistics.censored, 1);
    assert_eq!(output.statistics.completed, 0);

    let history = &output.histories[0];
    assert_eq!(history.status, PatientStatus::Censored);
    // wait → clinic → diagnostics → censored
    assert_eq!(history.records.last().unwrap().stage, PathwayStage::Censored);
    assert!(history
        .records
        .iter()
        .any(|r| r.stage == PathwayStage::Diagnostics));

    let censored_events = orchestrator.event_log().events_of_type("Censored");
    assert_eq!(censored_events.len(), 1);
    match censored_events[0] {
        pathway_simulator_core_rs::Event::Censored { reason, .. } => {
            assert!(reason.contains("no outgoing edges"), "reason was: {}", reason);
        }
        _ => unreachable!(),
    }
}

/// With a clean artifact every patient finishes; nobody is censored.
#[test]
fn test_clean_run_completes_every_patient() {
    let config = base_config();
    let mut orchestrator = HybridOrchestrator::new(config, pathway_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    assert_eq!(output.histories.len(), 5);
    assert_eq!(output.statistics.completed, 5);
    assert_eq!(output.statistics.censored, 0);

    for history in &output.histories {
        assert_eq!(history.records[0].stage, PathwayStage::AwaitingReferral);
        assert!(history.records.last().unwrap().stage.is_terminal());
    }
}

/// A stage wired to a zero-capacity pool can never be served: the requesting
/// patient is censored, the run survives.
#[test]
fn test_structural_deadlock_censors_patient() {
    let mut config = base_config();
    config.max_patients = Some(1);
    config.run_horizon = 100.0;
    config.presenting_rate = 20.0;
    config.resources[0].capacity = 0; // clinic_slots

    let mut orchestrator = HybridOrchestrator::new(config, dead_end_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    assert_eq!(output.statistics.censored, 1);
    let censored_events = orchestrator.event_log().events_of_type("Censored");
    match censored_events[0] {
        pathway_simulator_core_rs::Event::Censored { reason, .. } => {
            assert!(reason.contains("can never grant"), "reason was: {}", reason);
        }
        _ => unreachable!(),
    }
}

// ============================================================================
// Horizon censoring and accounting
// ============================================================================

#[test]
fn test_horizon_censors_survivors_and_accounting_balances() {
    let mut config = base_config();
    // A horizon too short for anyone to finish waiting
    config.run_horizon = 0.5;
    config.presenting_rate = 1e-9;
    config.max_patients = Some(3);
    config.arrivals.rate_per_day = 50.0;

    let mut orchestrator = HybridOrchestrator::new(config, pathway_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    assert_eq!(output.end_time, 0.5);
    assert_eq!(output.statistics.completed, 0);
    assert_eq!(output.statistics.censored, output.histories.len());
    for history in &output.histories {
        assert_eq!(history.status, PatientStatus::Censored);
        assert_eq!(history.records.last().unwrap().time, 0.5);
    }
}

#[test]
fn test_statuses_partition_population() {
    let mut config = base_config();
    config.max_patients = Some(10);
    config.escalation_threshold = 2.0;
    config.deterioration = DeteriorationModel::Linear { rate: 0.05 };
    config.run_horizon = 60.0;

    let mut orchestrator = HybridOrchestrator::new(config, pathway_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    assert_eq!(
        output.statistics.completed + output.statistics.censored,
        output.histories.len()
    );
    // Escalations are one-shot per patient
    assert!(output.statistics.threshold_breaches <= output.histories.len());
}

// ============================================================================
// Gatekeeping
// ============================================================================

#[test]
fn test_tight_gatekeeping_defers_presentations() {
    let mut config = base_config();
    config.max_patients = Some(3);
    config.run_horizon = 5.0;
    config.presenting_rate = 5.0;
    config.arrivals.rate_per_day = 50.0;
    config.arrivals.gatekeeping =
        Some(pathway_simulator_core_rs::GatekeepingPolicy::Fixed { threshold: 1e-4 });

    let mut orchestrator = HybridOrchestrator::new(config, pathway_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    assert!(
        output.statistics.deferrals > 0,
        "near-zero capacity must defer presentations"
    );
    let deferred = orchestrator.event_log().events_of_type("ReferralDeferred");
    assert_eq!(deferred.len(), output.statistics.deferrals);
}

// ============================================================================
// Resource-constrained flow
// ============================================================================

#[test]
fn test_contended_run_grants_are_consistent() {
    let mut config = base_config();
    config.max_patients = Some(8);
    config.arrivals.rate_per_day = 50.0;
    config.presenting_rate = 20.0;
    config.run_horizon = 500.0;
    config.resources[0].capacity = 1; // clinic_slots

    let mut orchestrator = HybridOrchestrator::new(config, pathway_artifact()).unwrap();
    let output = orchestrator.run().unwrap();

    assert_eq!(output.histories.len(), 8);
    assert_eq!(
        output.statistics.completed + output.statistics.censored,
        output.histories.len()
    );

    // Every recorded grant waited a non-negative time
    for event in orchestrator.event_log().events_of_type("ResourceGranted") {
        match event {
            pathway_simulator_core_rs::Event::ResourceGranted { waited, .. } => {
                assert!(*waited >= 0.0);
            }
            _ => unreachable!(),
        }
    }

    // Queue-length series exist for both pools and were sampled per event
    assert!(!output.statistics.queue_lengths["clinic_slots"].is_empty());
    assert!(!output.statistics.queue_lengths["theatre_sessions"].is_empty());
}

// ============================================================================
// Configuration validation
// ============================================================================

#[test]
fn test_invalid_configs_rejected_before_run() {
    let artifact = pathway_artifact();

    let mut bad = base_config();
    bad.run_horizon = 0.0;
    assert!(matches!(
        HybridOrchestrator::new(bad, artifact.clone()),
        Err(SimulationError::InvalidConfig(_))
    ));

    let mut bad = base_config();
    bad.stage_delays.remove(&PathwayStage::Surgery);
    assert!(matches!(
        HybridOrchestrator::new(bad, artifact.clone()),
        Err(SimulationError::InvalidConfig(_))
    ));

    let mut bad = base_config();
    bad.stage_resources
        .insert(PathwayStage::Diagnostics, "imaging".to_string());
    assert!(matches!(
        HybridOrchestrator::new(bad, artifact.clone()),
        Err(SimulationError::InvalidConfig(_))
    ));

    let mut bad = base_config();
    bad.arrivals.band_splits = [0.5, 0.5, 0.5];
    assert!(matches!(
        HybridOrchestrator::new(bad, artifact.clone()),
        Err(SimulationError::InvalidConfig(_))
    ));

    // Step too large for an exponential rate constant
    let mut bad = base_config();
    bad.deterioration = DeteriorationModel::Exponential { rate: 4.0 };
    bad.integration.step = 0.25;
    assert!(matches!(
        HybridOrchestrator::new(bad, artifact.clone()),
        Err(SimulationError::InvalidConfig(_))
    ));

    // Artifact missing a decision point
    let partial = PdfaSet::from_json_str(
        r#"{"decision_points": [{
            "name": "gp_referral",
            "states": [{"name": "q0"}, {"name": "q1", "accepting": true}],
            "initial": "q0",
            "edges": [{"from": "q0", "symbol": "clinic", "probability": 1.0, "to": "q1"}]
        }]}"#,
    )
    .unwrap();
    assert!(matches!(
        HybridOrchestrator::new(base_config(), partial),
        Err(SimulationError::InvalidConfig(_))
    ));
}
