//! PDFA artifact file format
//!
//! The artifact is produced by the external pathway-mining tool and consumed
//! here as a fixed input. One artifact describes every decision point in the
//! pathway; each decision point carries its own automaton. Edge order in the
//! file is preserved and becomes the deterministic sampling order, so two
//! loads of the same artifact always sample identically.
//!
//! All structural validation (determinism, probability normalisation, symbol
//! vocabulary) happens in [`crate::automaton::PdfaSet::from_artifact`], not
//! here; these types only mirror the file.

use serde::{Deserialize, Serialize};

/// Whole artifact: one automaton per decision point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfaArtifact {
    pub decision_points: Vec<AutomatonSpec>,
}

impl PdfaArtifact {
    /// Parse an artifact from its JSON representation
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Automaton for a single decision point, as mined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomatonSpec {
    /// Decision point name (e.g. "gp_referral", "orthopaedic")
    pub name: String,

    /// Automaton states; names are unique within the automaton
    pub states: Vec<StateSpec>,

    /// Name of the initial state
    pub initial: String,

    /// Labelled, weighted edges in mined order
    pub edges: Vec<EdgeSpec>,
}

/// A single automaton state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,

    /// Accepting states mark pathway completion points in the mined model
    #[serde(default)]
    pub accepting: bool,
}

/// A labelled transition edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,

    /// Transition symbol; must map onto a known pathway stage
    pub symbol: String,

    /// Probability of this transition given the source state
    pub probability: f64,

    pub to: String,
}
