//! PDFA engine
//!
//! Holds one Probabilistic Deterministic Finite Automaton per pathway
//! decision point and samples transitions from them. Automata are validated
//! once at load time and never mutated afterwards; every patient carries only
//! a current-state index per decision point.
//!
//! # Determinism
//!
//! - At most one outgoing edge per symbol per state (checked, not assumed).
//! - Outgoing probabilities at each state sum to 1 within [`PROBABILITY_TOLERANCE`].
//! - Sampling maps a uniform draw onto the cumulative distribution in the
//!   artifact's edge order, so identical draws always select identical edges.

pub mod artifact;

use std::collections::HashMap;

use thiserror::Error;

use crate::models::stage::PathwayStage;
use artifact::{AutomatonSpec, PdfaArtifact};

/// Tolerance for per-state outgoing probability mass
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// Fatal artifact validation errors (load time)
#[derive(Debug, Error)]
pub enum MalformedAutomatonError {
    #[error("artifact is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate decision point '{0}' in artifact")]
    DuplicateDecisionPoint(String),

    #[error("automaton '{decision_point}' has no states")]
    EmptyAutomaton { decision_point: String },

    #[error("automaton '{decision_point}' declares state '{state}' twice")]
    DuplicateState { decision_point: String, state: String },

    #[error("automaton '{decision_point}' references unknown state '{state}'")]
    UnknownState { decision_point: String, state: String },

    #[error("automaton '{decision_point}' uses unknown transition symbol '{symbol}'")]
    UnknownSymbol { decision_point: String, symbol: String },

    #[error(
        "automaton '{decision_point}' state '{state}' has two edges for symbol '{symbol}' \
         (determinism violation)"
    )]
    DuplicateSymbol {
        decision_point: String,
        state: String,
        symbol: String,
    },

    #[error(
        "automaton '{decision_point}' state '{state}' edge '{symbol}' has invalid \
         probability {probability}"
    )]
    InvalidProbability {
        decision_point: String,
        state: String,
        symbol: String,
        probability: f64,
    },

    #[error(
        "automaton '{decision_point}' state '{state}' outgoing probabilities sum to {sum}, \
         expected 1 within {tolerance}"
    )]
    ProbabilityMass {
        decision_point: String,
        state: String,
        sum: f64,
        tolerance: f64,
    },
}

/// A state with no outgoing edges was asked for a transition
///
/// Recovered by the coordinator: the affected patient is censored and the run
/// continues. Accepting no-edge states are only ever reached through symbols
/// that map to terminal stages, so hitting one here means the artifact is
/// inconsistent for this patient's pathway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("automaton '{decision_point}' state '{state}' has no outgoing edges")]
pub struct DeadEndStateError {
    pub decision_point: String,
    pub state: String,
}

/// A sampled or forced transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition<'a> {
    /// The selected transition symbol
    pub symbol: &'a str,
    /// Pathway stage the symbol maps onto
    pub stage: PathwayStage,
    /// Automaton state after taking the edge
    pub next_state: usize,
}

#[derive(Debug, Clone)]
struct PdfaEdge {
    symbol: String,
    stage: PathwayStage,
    probability: f64,
    target: usize,
}

#[derive(Debug, Clone)]
struct PdfaState {
    name: String,
    accepting: bool,
    /// Outgoing edges in artifact order; this order defines the cumulative
    /// distribution used for sampling
    edges: Vec<PdfaEdge>,
}

/// Validated automaton for one decision point
///
/// Immutable after construction and shared read-only across all patients.
#[derive(Debug, Clone)]
pub struct Pdfa {
    name: String,
    states: Vec<PdfaState>,
    initial: usize,
}

impl Pdfa {
    /// Build and validate an automaton from its artifact spec
    pub fn from_spec(spec: &AutomatonSpec) -> Result<Self, MalformedAutomatonError> {
        let dp = spec.name.clone();

        if spec.states.is_empty() {
            return Err(MalformedAutomatonError::EmptyAutomaton { decision_point: dp });
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, state) in spec.states.iter().enumerate() {
            if index.insert(state.name.as_str(), i).is_some() {
                return Err(MalformedAutomatonError::DuplicateState {
                    decision_point: dp,
                    state: state.name.clone(),
                });
            }
        }

        let initial = *index.get(spec.initial.as_str()).ok_or_else(|| {
            MalformedAutomatonError::UnknownState {
                decision_point: dp.clone(),
                state: spec.initial.clone(),
            }
        })?;

        let mut states: Vec<PdfaState> = spec
            .states
            .iter()
            .map(|s| PdfaState {
                name: s.name.clone(),
                accepting: s.accepting,
                edges: Vec::new(),
            })
            .collect();

        for edge in &spec.edges {
            let from = *index.get(edge.from.as_str()).ok_or_else(|| {
                MalformedAutomatonError::UnknownState {
                    decision_point: dp.clone(),
                    state: edge.from.clone(),
                }
            })?;
            let target = *index.get(edge.to.as_str()).ok_or_else(|| {
                MalformedAutomatonError::UnknownState {
                    decision_point: dp.clone(),
                    state: edge.to.clone(),
                }
            })?;

            let stage = PathwayStage::from_symbol(&edge.symbol).ok_or_else(|| {
                MalformedAutomatonError::UnknownSymbol {
                    decision_point: dp.clone(),
                    symbol: edge.symbol.clone(),
                }
            })?;

            if !edge.probability.is_finite() || edge.probability < 0.0 {
                return Err(MalformedAutomatonError::InvalidProbability {
                    decision_point: dp,
                    state: edge.from.clone(),
                    symbol: edge.symbol.clone(),
                    probability: edge.probability,
                });
            }

            let state = &mut states[from];
            if state.edges.iter().any(|e| e.symbol == edge.symbol) {
                return Err(MalformedAutomatonError::DuplicateSymbol {
                    decision_point: dp,
                    state: edge.from.clone(),
                    symbol: edge.symbol.clone(),
                });
            }

            state.edges.push(PdfaEdge {
                symbol: edge.symbol.clone(),
                stage,
                probability: edge.probability,
                target,
            });
        }

        for state in &states {
            if state.edges.is_empty() {
                continue;
            }
            let sum: f64 = state.edges.iter().map(|e| e.probability).sum();
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(MalformedAutomatonError::ProbabilityMass {
                    decision_point: dp,
                    state: state.name.clone(),
                    sum,
                    tolerance: PROBABILITY_TOLERANCE,
                });
            }
        }

        Ok(Self {
            name: dp,
            states,
            initial,
        })
    }

    /// Decision point this automaton governs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the initial state
    pub fn initial_state(&self) -> usize {
        self.initial
    }

    /// Number of states
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Name of a state by index
    pub fn state_name(&self, state: usize) -> &str {
        &self.states[state].name
    }

    /// Whether a state is accepting
    pub fn is_accepting(&self, state: usize) -> bool {
        self.states[state].accepting
    }

    /// Sample the next transition from `state` using a uniform draw in `[0, 1)`
    ///
    /// The draw is mapped onto the cumulative probability distribution of the
    /// state's outgoing edges in artifact order, so identical draws always
    /// yield identical symbols. State advancement is applied by the caller.
    ///
    /// # Example
    /// ```
    /// use pathway_simulator_core_rs::automaton::PdfaSet;
    ///
    /// let json = r#"{"decision_points": [{
    ///     "name": "gp_referral",
    ///     "states": [{"name": "q0"}, {"name": "q1", "accepting": true}],
    ///     "initial": "q0",
    ///     "edges": [
    ///         {"from": "q0", "symbol": "clinic", "probability": 0.7, "to": "q1"},
    ///         {"from": "q0", "symbol": "discharge", "probability": 0.3, "to": "q1"}
    ///     ]
    /// }]}"#;
    /// let set = PdfaSet::from_json_str(json).unwrap();
    /// let pdfa = set.get("gp_referral").unwrap();
    ///
    /// let t = pdfa.sample_next(pdfa.initial_state(), 0.25).unwrap();
    /// assert_eq!(t.symbol, "clinic");
    /// let t = pdfa.sample_next(pdfa.initial_state(), 0.95).unwrap();
    /// assert_eq!(t.symbol, "discharge");
    /// ```
    pub fn sample_next(&self, state: usize, draw: f64) -> Result<Transition<'_>, DeadEndStateError> {
        debug_assert!((0.0..1.0).contains(&draw), "draw must be in [0, 1)");

        let node = &self.states[state];
        if node.edges.is_empty() {
            return Err(DeadEndStateError {
                decision_point: self.name.clone(),
                state: node.name.clone(),
            });
        }

        let mut cumulative = 0.0;
        for edge in &node.edges {
            cumulative += edge.probability;
            if draw < cumulative {
                return Ok(Transition {
                    symbol: &edge.symbol,
                    stage: edge.stage,
                    next_state: edge.target,
                });
            }
        }

        // Probability mass sums to 1 within tolerance; a draw past the
        // accumulated total lands on the final edge.
        let last = node.edges.last().unwrap();
        Ok(Transition {
            symbol: &last.symbol,
            stage: last.stage,
            next_state: last.target,
        })
    }

    /// Follow a specific symbol from `state`, if such an edge exists
    ///
    /// Deterministic by construction (at most one edge per symbol). Used for
    /// coordinator-forced transitions such as urgent escalation, keeping
    /// every stage change a valid automaton edge.
    pub fn follow_symbol(&self, state: usize, symbol: &str) -> Option<Transition<'_>> {
        self.states[state]
            .edges
            .iter()
            .find(|e| e.symbol == symbol)
            .map(|edge| Transition {
                symbol: &edge.symbol,
                stage: edge.stage,
                next_state: edge.target,
            })
    }
}

/// All automata for a run, keyed by decision point
///
/// Loaded once per run from the mined artifact; shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct PdfaSet {
    automata: HashMap<String, Pdfa>,
}

impl PdfaSet {
    /// Validate every automaton in an artifact
    pub fn from_artifact(artifact: &PdfaArtifact) -> Result<Self, MalformedAutomatonError> {
        let mut automata = HashMap::new();
        for spec in &artifact.decision_points {
            let pdfa = Pdfa::from_spec(spec)?;
            if automata.insert(spec.name.clone(), pdfa).is_some() {
                return Err(MalformedAutomatonError::DuplicateDecisionPoint(
                    spec.name.clone(),
                ));
            }
        }
        Ok(Self { automata })
    }

    /// Parse and validate an artifact from JSON
    pub fn from_json_str(json: &str) -> Result<Self, MalformedAutomatonError> {
        let artifact = PdfaArtifact::from_json_str(json)?;
        Self::from_artifact(&artifact)
    }

    /// Automaton for a decision point
    pub fn get(&self, decision_point: &str) -> Option<&Pdfa> {
        self.automata.get(decision_point)
    }

    /// Whether a decision point is present
    pub fn contains(&self, decision_point: &str) -> bool {
        self.automata.contains_key(decision_point)
    }

    /// Initial automaton state per decision point, in a fresh map
    ///
    /// Every new patient starts from these states.
    pub fn initial_states(&self) -> HashMap<String, usize> {
        self.automata
            .iter()
            .map(|(name, pdfa)| (name.clone(), pdfa.initial_state()))
            .collect()
    }

    /// Number of decision points
    pub fn len(&self) -> usize {
        self.automata.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.automata.is_empty()
    }
}
