//! Checkpoint - save/load simulation state
//!
//! Serializes the complete orchestrator state for pause/resume. A snapshot
//! can only be restored with the configuration (and automaton set) it was
//! taken under; a SHA-256 hash of the canonicalized config JSON guards the
//! pairing.
//!
//! # Critical invariants
//!
//! - **Determinism**: a restored run continues exactly where the original
//!   would have gone (RNG state, pending events, and the id counter all ride
//!   along in the snapshot).
//! - **Config matching**: restoring under a different config is rejected.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::arrivals::ReferralGenerator;
use crate::automaton::PdfaSet;
use crate::models::state::SimulationState;
use crate::orchestrator::engine::{HybridOrchestrator, ScenarioConfig, SimulationError};
use crate::orchestrator::stats::RunStatistics;
use crate::rng::RngManager;
use crate::scheduler::{DesEvent, EventScheduler};

/// Complete orchestrator state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Simulation time at snapshot
    pub time: f64,

    /// Scheduler insertion counter (handles stay valid after restore)
    pub next_seq: u64,

    /// RNG internal state (CRITICAL for determinism)
    pub rng_state: u64,

    /// Patient id counter
    pub num_generated: usize,

    /// All patients, the waiting population, and the pools
    pub state: SimulationState,

    /// Pending events in pop order
    pub pending_events: Vec<DesEvent>,

    /// Statistics accumulated so far
    pub statistics: RunStatistics,

    /// SHA-256 hash of the canonicalized config JSON
    pub config_hash: String,
}

impl StateSnapshot {
    /// Capture the orchestrator's complete state
    pub fn capture(orchestrator: &HybridOrchestrator) -> Result<Self, SimulationError> {
        Ok(Self {
            time: orchestrator.current_time(),
            next_seq: orchestrator.scheduler().next_seq(),
            rng_state: orchestrator.rng().get_state(),
            num_generated: orchestrator.generator().num_generated(),
            state: orchestrator.state().clone(),
            pending_events: orchestrator.scheduler().pending_events(),
            statistics: orchestrator.statistics().clone(),
            config_hash: compute_config_hash(orchestrator.config())?,
        })
    }

    /// Restore an orchestrator from this snapshot
    ///
    /// Fails with `CheckpointMismatch` if `config` is not the configuration
    /// the snapshot was captured under.
    pub fn restore(
        self,
        config: ScenarioConfig,
        pdfas: PdfaSet,
    ) -> Result<HybridOrchestrator, SimulationError> {
        let expected = compute_config_hash(&config)?;
        if expected != self.config_hash {
            return Err(SimulationError::CheckpointMismatch(format!(
                "config hash {} does not match snapshot hash {}",
                expected, self.config_hash
            )));
        }

        let scheduler = EventScheduler::from_snapshot(self.time, self.next_seq, self.pending_events);
        let mut generator = ReferralGenerator::new(config.arrivals.clone());
        generator.restore_counter(self.num_generated);
        let rng = RngManager::new(self.rng_state);

        Ok(HybridOrchestrator::from_parts(
            config,
            pdfas,
            self.state,
            scheduler,
            generator,
            rng,
            self.statistics,
        ))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, SimulationError> {
        serde_json::to_string(self)
            .map_err(|e| SimulationError::SerializationError(format!("snapshot encode: {}", e)))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        serde_json::from_str(json)
            .map_err(|e| SimulationError::SerializationError(format!("snapshot decode: {}", e)))
    }
}

/// Compute a deterministic SHA-256 hash of a config
///
/// Serializes via `serde_json::Value` with recursively sorted object keys so
/// the hash is stable regardless of map iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config)
        .map_err(|e| SimulationError::SerializationError(format!("config serialization: {}", e)))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let canonical = canonicalize(value);
    let json = serde_json::to_string(&canonical)
        .map_err(|e| SimulationError::SerializationError(format!("config serialization: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_hash_deterministic() {
        let a = compute_config_hash(&serde_json::json!({"b": 1, "a": [1, 2]})).unwrap();
        let b = compute_config_hash(&serde_json::json!({"a": [1, 2], "b": 1})).unwrap();
        assert_eq!(a, b, "key order must not affect the hash");

        let c = compute_config_hash(&serde_json::json!({"a": [2, 1], "b": 1})).unwrap();
        assert_ne!(a, c, "array order is significant");
    }

    #[test]
    fn test_config_hash_is_hex_sha256() {
        let hash = compute_config_hash(&serde_json::json!({"x": true})).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
