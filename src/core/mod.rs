//! Core orchestration abstractions: core allocations, scheduling and verdicts.

pub mod aggregate;
pub mod allocation;
pub mod audit;
pub mod error;
pub mod job;
pub mod provisioner;
pub mod resource_pool;
pub mod runner;
pub mod scheduler;

pub use aggregate::RunSummary;
pub use allocation::CoreAllocation;
pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use error::{AppResult, OrchestratorError};
pub use job::{Job, JobOutcome, JobReport, JobResult, JobState};
pub use provisioner::{ImageProvisioner, ImageStore, Provisioned};
pub use resource_pool::{CoreLease, PoolStats, ResourcePool};
pub use runner::JobRunner;
pub use scheduler::Scheduler;
