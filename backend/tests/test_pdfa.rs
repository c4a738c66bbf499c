//! PDFA engine tests
//!
//! Load-time validation (determinism, probability normalisation) and the
//! sampling contract: a uniform draw maps onto the cumulative distribution in
//! fixed edge order, identically every time.

use pathway_simulator_core_rs::automaton::{MalformedAutomatonError, PdfaSet};
use pathway_simulator_core_rs::{PathwayStage, RngManager};

fn referral_artifact() -> &'static str {
    r#"{
        "decision_points": [{
            "name": "gp_referral",
            "states": [
                {"name": "q0"},
                {"name": "q1", "accepting": true}
            ],
            "initial": "q0",
            "edges": [
                {"from": "q0", "symbol": "clinic", "probability": 0.6, "to": "q1"},
                {"from": "q0", "symbol": "escalate", "probability": 0.3, "to": "q1"},
                {"from": "q0", "symbol": "discharge", "probability": 0.1, "to": "q1"}
            ]
        }]
    }"#
}

#[test]
fn test_load_valid_artifact() {
    let set = PdfaSet::from_json_str(referral_artifact()).unwrap();
    assert_eq!(set.len(), 1);

    let pdfa = set.get("gp_referral").unwrap();
    assert_eq!(pdfa.num_states(), 2);
    assert_eq!(pdfa.state_name(pdfa.initial_state()), "q0");
    assert!(pdfa.is_accepting(1));
}

#[test]
fn test_probability_sum_checked_within_tolerance() {
    // 0.6 + 0.3 + 0.2 = 1.1: reject
    let bad = referral_artifact().replace("0.1", "0.2");
    match PdfaSet::from_json_str(&bad) {
        Err(MalformedAutomatonError::ProbabilityMass { state, .. }) => assert_eq!(state, "q0"),
        other => panic!("expected ProbabilityMass, got {:?}", other.map(|_| ())),
    }

    // An error of 1e-12 is inside the 1e-9 tolerance
    let nearly = referral_artifact().replace("0.1", "0.100000000001");
    assert!(PdfaSet::from_json_str(&nearly).is_ok());
}

#[test]
fn test_determinism_constraint_checked() {
    let duplicated = referral_artifact().replace("\"discharge\"", "\"clinic\"");
    match PdfaSet::from_json_str(&duplicated) {
        Err(MalformedAutomatonError::DuplicateSymbol { symbol, .. }) => {
            assert_eq!(symbol, "clinic");
        }
        other => panic!("expected DuplicateSymbol, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_negative_probability_rejected() {
    let negative = referral_artifact()
        .replace("0.6", "-0.1")
        .replace("0.3", "1.0");
    assert!(matches!(
        PdfaSet::from_json_str(&negative),
        Err(MalformedAutomatonError::InvalidProbability { .. })
    ));
}

#[test]
fn test_sample_maps_draw_onto_cumulative_distribution() {
    let set = PdfaSet::from_json_str(referral_artifact()).unwrap();
    let pdfa = set.get("gp_referral").unwrap();
    let q0 = pdfa.initial_state();

    // Edge order is artifact order: clinic [0, 0.6), escalate [0.6, 0.9),
    // discharge [0.9, 1)
    assert_eq!(pdfa.sample_next(q0, 0.0).unwrap().symbol, "clinic");
    assert_eq!(pdfa.sample_next(q0, 0.59).unwrap().symbol, "clinic");
    assert_eq!(pdfa.sample_next(q0, 0.6).unwrap().symbol, "escalate");
    assert_eq!(pdfa.sample_next(q0, 0.89).unwrap().symbol, "escalate");
    assert_eq!(pdfa.sample_next(q0, 0.9).unwrap().symbol, "discharge");
    assert_eq!(pdfa.sample_next(q0, 0.9999999).unwrap().symbol, "discharge");
}

#[test]
fn test_sampled_frequencies_match_probabilities() {
    let set = PdfaSet::from_json_str(referral_artifact()).unwrap();
    let pdfa = set.get("gp_referral").unwrap();
    let q0 = pdfa.initial_state();
    let mut rng = RngManager::new(20_000);

    let mut clinic = 0usize;
    let n = 20_000;
    for _ in 0..n {
        let t = pdfa.sample_next(q0, rng.next_f64()).unwrap();
        if t.symbol == "clinic" {
            clinic += 1;
        }
    }

    let frequency = clinic as f64 / n as f64;
    assert!(
        (frequency - 0.6).abs() < 0.02,
        "clinic frequency drifted: {}",
        frequency
    );
}

#[test]
fn test_symbols_map_to_stages() {
    let set = PdfaSet::from_json_str(referral_artifact()).unwrap();
    let pdfa = set.get("gp_referral").unwrap();
    let q0 = pdfa.initial_state();

    let t = pdfa.sample_next(q0, 0.0).unwrap();
    assert_eq!(t.stage, PathwayStage::OutpatientClinic);
    let t = pdfa.sample_next(q0, 0.7).unwrap();
    assert_eq!(t.stage, PathwayStage::Escalated);
}

#[test]
fn test_shared_read_only_across_patients() {
    // Sampling never mutates the automaton: two interleaved "patients" with
    // their own state indices see identical behavior
    let set = PdfaSet::from_json_str(referral_artifact()).unwrap();
    let pdfa = set.get("gp_referral").unwrap();
    let q0 = pdfa.initial_state();

    let first = pdfa.sample_next(q0, 0.5).unwrap().next_state;
    for _ in 0..100 {
        assert_eq!(pdfa.sample_next(q0, 0.5).unwrap().next_state, first);
    }
}
