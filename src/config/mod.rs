//! Configuration models for runs.

pub mod orchestrator;

pub use orchestrator::{default_max_concurrency, OrchestratorConfig};
