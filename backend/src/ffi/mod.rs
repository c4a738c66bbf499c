//! Python FFI layer (feature `pyo3`)
//!
//! The Python tooling owns scenario files, plotting, and Monte Carlo
//! replication; this layer exposes the orchestrator behind a deliberately
//! thin boundary: JSON strings in, JSON strings out.

pub mod orchestrator;
