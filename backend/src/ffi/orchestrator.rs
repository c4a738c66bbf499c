//! PyO3 wrapper for the hybrid orchestrator
//!
//! # Example (from Python)
//!
//! ```python
//! from pathway_simulator_core_rs import Orchestrator
//!
//! with open("scenario.json") as f:
//!     scenario = f.read()
//! with open("pdfa.json") as f:
//!     artifact = f.read()
//!
//! orch = Orchestrator(scenario, artifact)
//! output = json.loads(orch.run())
//! print(output["statistics"]["completed"])
//! ```

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::automaton::PdfaSet;
use crate::orchestrator::{HybridOrchestrator, ScenarioConfig};

/// Python wrapper for the Rust orchestrator
#[pyclass(name = "Orchestrator")]
pub struct PyOrchestrator {
    inner: HybridOrchestrator,
}

#[pymethods]
impl PyOrchestrator {
    /// Create an orchestrator from scenario-config JSON and PDFA-artifact JSON
    ///
    /// Raises `ValueError` on malformed JSON, artifact validation failures,
    /// or invalid scenario parameters.
    #[new]
    fn new(config_json: &str, artifact_json: &str) -> PyResult<Self> {
        let config: ScenarioConfig = serde_json::from_str(config_json)
            .map_err(|e| PyValueError::new_err(format!("invalid scenario config: {}", e)))?;
        let pdfas = PdfaSet::from_json_str(artifact_json)
            .map_err(|e| PyValueError::new_err(format!("invalid PDFA artifact: {}", e)))?;

        let inner = HybridOrchestrator::new(config, pdfas)
            .map_err(|e| PyValueError::new_err(format!("failed to create orchestrator: {}", e)))?;

        Ok(PyOrchestrator { inner })
    }

    /// Process one event; returns False once the run is complete
    fn step(&mut self) -> PyResult<bool> {
        let result = self
            .inner
            .step()
            .map_err(|e| PyRuntimeError::new_err(format!("step failed: {}", e)))?;
        Ok(result.is_some())
    }

    /// Run to completion and return the output as JSON
    fn run(&mut self) -> PyResult<String> {
        let output = self
            .inner
            .run()
            .map_err(|e| PyRuntimeError::new_err(format!("run failed: {}", e)))?;
        serde_json::to_string(&output)
            .map_err(|e| PyRuntimeError::new_err(format!("output encode failed: {}", e)))
    }

    /// Current simulation time in days
    fn current_time(&self) -> f64 {
        self.inner.current_time()
    }

    /// Whether the run has reached its stop condition
    fn is_complete(&self) -> bool {
        self.inner.is_complete()
    }

    /// Number of events in the observation log
    fn event_count(&self) -> usize {
        self.inner.event_log().len()
    }

    /// Current output (histories + statistics) as JSON, without running
    fn output(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner.output())
            .map_err(|e| PyRuntimeError::new_err(format!("output encode failed: {}", e)))
    }
}
