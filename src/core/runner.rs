//! Job execution seam.

use async_trait::async_trait;

use super::{CoreAllocation, Job, JobResult, OrchestratorError};

/// Runs exactly one job on exactly one core allocation.
///
/// The scheduler owns the allocation for the whole call and releases it once
/// `run` returns, whatever the result. Implementations must not retry.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use bench_orchestrator::core::{CoreAllocation, Job, JobResult, JobRunner, OrchestratorError};
///
/// struct EchoRunner;
///
/// #[async_trait]
/// impl JobRunner for EchoRunner {
///     async fn run(
///         &self,
///         index: usize,
///         job: &Job,
///         cores: &CoreAllocation,
///     ) -> Result<JobResult, OrchestratorError> {
///         println!("{} on {}", job.label(index), cores);
///         Ok(JobResult { job_id: job.id.clone(), exit_code: 0, log_path: "/dev/null".into() })
///     }
/// }
/// ```
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Launch the job pinned to `cores`, wait for it to terminate and report
    /// its exit status.
    ///
    /// A nonzero exit status is a normal result. An `Err` means the process
    /// could not be launched or observed.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the job in the submitted list
    /// * `job` - The job to run
    /// * `cores` - Cores the process must be confined to
    async fn run(
        &self,
        index: usize,
        job: &Job,
        cores: &CoreAllocation,
    ) -> Result<JobResult, OrchestratorError>;

    /// Force-terminate a job previously started by [`JobRunner::run`].
    ///
    /// Called when a run is aborted while the job is still running. The
    /// default does nothing.
    async fn terminate(&self, _index: usize, _job: &Job) -> Result<(), OrchestratorError> {
        Ok(())
    }
}
