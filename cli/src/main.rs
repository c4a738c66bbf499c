//! Thin command-line runner
//!
//! Usage: `pathway-simulator <scenario.json> <pdfa.json>`
//!
//! Loads the scenario configuration and PDFA artifact, runs the simulation,
//! and prints the run output as JSON on stdout. All logic lives in the core
//! crate; this binary is I/O plumbing only.

use std::process::ExitCode;

use pathway_simulator_core_rs::{HybridOrchestrator, PdfaSet, ScenarioConfig};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <scenario.json> <pdfa.json>", args[0]);
        return ExitCode::from(2);
    }

    match run(&args[1], &args[2]) {
        Ok(output_json) => {
            println!("{}", output_json);
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn run(scenario_path: &str, artifact_path: &str) -> Result<String, String> {
    let scenario_json = std::fs::read_to_string(scenario_path)
        .map_err(|e| format!("cannot read {}: {}", scenario_path, e))?;
    let artifact_json = std::fs::read_to_string(artifact_path)
        .map_err(|e| format!("cannot read {}: {}", artifact_path, e))?;

    let config: ScenarioConfig =
        serde_json::from_str(&scenario_json).map_err(|e| format!("invalid scenario: {}", e))?;
    let pdfas = PdfaSet::from_json_str(&artifact_json)
        .map_err(|e| format!("invalid PDFA artifact: {}", e))?;

    let mut orchestrator =
        HybridOrchestrator::new(config, pdfas).map_err(|e| e.to_string())?;
    let output = orchestrator.run().map_err(|e| e.to_string())?;

    serde_json::to_string_pretty(&output).map_err(|e| format!("output encode: {}", e))
}
