//! Run-level entry points: provision images, then schedule every job.

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::builders::build_orchestrator;
use crate::config::OrchestratorConfig;
use crate::core::{
    ImageProvisioner, ImageStore, Job, JobRunner, OrchestratorError, RunSummary, Scheduler,
};

/// Provisioner and scheduler for one run.
pub struct Orchestrator<S, R: JobRunner> {
    provisioner: ImageProvisioner<S>,
    scheduler: Scheduler<R>,
    run_id: String,
}

impl<S: ImageStore, R: JobRunner> Orchestrator<S, R> {
    /// Combine a provisioner and a scheduler.
    pub fn new(provisioner: ImageProvisioner<S>, scheduler: Scheduler<R>) -> Self {
        Self {
            provisioner,
            scheduler,
            run_id: "run".into(),
        }
    }

    /// Identify the run in log output.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// The image provisioner.
    pub const fn provisioner(&self) -> &ImageProvisioner<S> {
        &self.provisioner
    }

    /// The scheduler.
    pub const fn scheduler(&self) -> &Scheduler<R> {
        &self.scheduler
    }

    /// Provision every distinct image, then run all jobs.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Infrastructure`] if any image cannot be
    /// provisioned, or [`OrchestratorError::Aborted`] if the scheduler's
    /// cancellation token fires while images are provisioned. No job is
    /// started in either case. Per-job failures are reported in the summary
    /// instead.
    pub async fn run(&self, jobs: Vec<Job>) -> Result<RunSummary, OrchestratorError> {
        let span = tracing::info_span!("run", run_id = %self.run_id);
        self.provision_then_schedule(jobs).instrument(span).await
    }

    async fn provision_then_schedule(
        &self,
        jobs: Vec<Job>,
    ) -> Result<RunSummary, OrchestratorError> {
        let cancel = self.scheduler.cancellation();
        let images = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(OrchestratorError::Aborted(
                    "cancelled while provisioning images".into(),
                ));
            }
            images = self.provisioner.provision_all(&jobs) => images?,
        };
        tracing::info!(images, "all required images available");
        Ok(self.scheduler.run(jobs).await)
    }
}

/// Run `jobs` with docker on this host according to `cfg`.
///
/// Validation and the core budget check happen before the daemon is contacted;
/// output directories are created before any image work.
///
/// # Errors
///
/// Returns a fatal [`OrchestratorError`]; per-job failures are reported in the
/// summary.
pub async fn run_benchmarks(
    cfg: &OrchestratorConfig,
    jobs: Vec<Job>,
    cancel: CancellationToken,
) -> Result<RunSummary, OrchestratorError> {
    let orchestrator = build_orchestrator(cfg, num_cpus::get(), cancel)?;
    prepare_output_dirs(cfg).await?;
    orchestrator.provisioner().store().ping().await?;
    orchestrator.run(jobs).await
}

/// Create `<output_dir>/logs` and `<output_dir>/results`.
///
/// # Errors
///
/// Returns [`OrchestratorError::Infrastructure`] if a directory cannot be
/// created.
pub async fn prepare_output_dirs(cfg: &OrchestratorConfig) -> Result<(), OrchestratorError> {
    for dir in [cfg.logs_dir(), cfg.results_dir()] {
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            OrchestratorError::Infrastructure(format!("cannot create {}: {e}", dir.display()))
        })?;
    }
    Ok(())
}
