//! Pathway stages and decision points
//!
//! A patient's DES state is one of a finite set of pathway stages. Stage
//! transitions are sampled from the PDFA governing the stage's decision
//! point; the transition symbols in the mined artifact map one-to-one onto
//! stages here. Unknown symbols are rejected at artifact load time.

use serde::{Deserialize, Serialize};

/// Decision point governing the move out of the waiting population
pub const GP_REFERRAL_DECISION: &str = "gp_referral";

/// Decision point governing routing inside the orthopaedic department
pub const ORTHOPAEDIC_DECISION: &str = "orthopaedic";

/// Transition symbol forced by the coordinator on a threshold breach
pub const ESCALATE_SYMBOL: &str = "escalate";

/// Stage of the orthopaedic referral pathway
///
/// # Example
/// ```
/// use pathway_simulator_core_rs::models::PathwayStage;
///
/// let stage = PathwayStage::from_symbol("surgery").unwrap();
/// assert_eq!(stage, PathwayStage::Surgery);
/// assert!(!stage.is_terminal());
/// assert!(PathwayStage::Discharged.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathwayStage {
    /// Unwell, not yet referred; the SD model deteriorates patients here
    AwaitingReferral,
    /// First orthopaedic outpatient appointment
    OutpatientClinic,
    /// Imaging / diagnostic work-up
    Diagnostics,
    /// Theatre session
    Surgery,
    /// Post-operative recovery
    Recovery,
    /// Follow-up appointment
    FollowUp,
    /// Urgent escalation out of the elective pathway (SD-triggered)
    Escalated,
    /// Normal pathway completion
    Discharged,
    /// Forcibly terminated (dead end, deadlock, or run end)
    Censored,
}

impl PathwayStage {
    /// Map a PDFA transition symbol onto a stage
    pub fn from_symbol(symbol: &str) -> Option<PathwayStage> {
        match symbol {
            "clinic" => Some(PathwayStage::OutpatientClinic),
            "diagnostics" => Some(PathwayStage::Diagnostics),
            "surgery" => Some(PathwayStage::Surgery),
            "recovery" => Some(PathwayStage::Recovery),
            "follow_up" => Some(PathwayStage::FollowUp),
            "discharge" => Some(PathwayStage::Discharged),
            ESCALATE_SYMBOL => Some(PathwayStage::Escalated),
            _ => None,
        }
    }

    /// Decision point whose automaton governs the next transition from this
    /// stage, or `None` for terminal stages
    pub fn decision_point(&self) -> Option<&'static str> {
        match self {
            PathwayStage::AwaitingReferral => Some(GP_REFERRAL_DECISION),
            PathwayStage::OutpatientClinic
            | PathwayStage::Diagnostics
            | PathwayStage::Surgery
            | PathwayStage::Recovery
            | PathwayStage::FollowUp => Some(ORTHOPAEDIC_DECISION),
            PathwayStage::Escalated | PathwayStage::Discharged | PathwayStage::Censored => None,
        }
    }

    /// Terminal stages end the patient's simulated pathway
    pub fn is_terminal(&self) -> bool {
        self.decision_point().is_none()
    }

    /// Stable display name (used in logs and output records)
    pub fn name(&self) -> &'static str {
        match self {
            PathwayStage::AwaitingReferral => "awaiting_referral",
            PathwayStage::OutpatientClinic => "outpatient_clinic",
            PathwayStage::Diagnostics => "diagnostics",
            PathwayStage::Surgery => "surgery",
            PathwayStage::Recovery => "recovery",
            PathwayStage::FollowUp => "follow_up",
            PathwayStage::Escalated => "escalated",
            PathwayStage::Discharged => "discharged",
            PathwayStage::Censored => "censored",
        }
    }
}

impl std::fmt::Display for PathwayStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
