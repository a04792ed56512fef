//! Builders to construct an orchestrator from configuration.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::core::{
    ImageProvisioner, OrchestratorError, ResourcePool, Scheduler, TracingAuditSink,
};
use crate::infra::{ContainerRunner, ContainerSettings, DockerCli};
use crate::runtime::Orchestrator;

/// Docker-backed orchestrator as assembled by [`build_orchestrator`].
pub type DockerOrchestrator = Orchestrator<DockerCli, ContainerRunner>;

/// Build a docker-backed orchestrator for a host with `host_cores` cores.
///
/// Configuration is validated and the resource pool is built here, so core
/// budget errors surface before any image or container work starts.
///
/// # Errors
///
/// Returns [`OrchestratorError::Configuration`] for invalid settings.
pub fn build_orchestrator(
    cfg: &OrchestratorConfig,
    host_cores: usize,
    cancel: CancellationToken,
) -> Result<DockerOrchestrator, OrchestratorError> {
    cfg.validate_for_host(host_cores).map_err(OrchestratorError::Configuration)?;

    let pool = ResourcePool::with_host_cores(cfg.max_concurrency_for(host_cores), cfg.n_cores, host_cores)?;

    let docker = DockerCli::new(&cfg.docker_program, &cfg.build_context);
    let runner = ContainerRunner::new(docker.clone(), ContainerSettings::from(cfg));
    let run_id = uuid::Uuid::new_v4().to_string();

    let scheduler = Scheduler::new(Arc::new(pool), Arc::new(runner))
        .with_run_id(run_id.clone())
        .with_audit(Arc::new(Mutex::new(TracingAuditSink)))
        .with_cancellation(cancel);

    Ok(Orchestrator::new(ImageProvisioner::new(docker), scheduler).with_run_id(run_id))
}
