//! Builders to construct orchestrator components from configuration.

pub mod orchestrator_builder;

pub use orchestrator_builder::{build_orchestrator, DockerOrchestrator};
