//! Error types for orchestration.

use thiserror::Error;

/// Errors produced by orchestrator components.
///
/// A job whose process exits nonzero is not an error: it is recorded as a
/// completed outcome carrying that exit code.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid core/concurrency arithmetic or other bad settings. Raised
    /// before any job starts.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Container runtime unreachable or an image could not be provisioned.
    /// Aborts the whole run.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    /// The run was aborted before its jobs were scheduled.
    #[error("run aborted: {0}")]
    Aborted(String),
    /// The orchestration layer failed to launch or observe a job's process.
    /// Terminal for that job only.
    #[error("runner fault for job {job}: {reason}")]
    RunnerFault {
        /// Label of the affected job.
        job: String,
        /// What went wrong.
        reason: String,
    },
}

impl OrchestratorError {
    /// Build a runner fault for `job`.
    pub fn runner_fault(job: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::RunnerFault {
            job: job.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the whole run rather than a single job.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Infrastructure(_) | Self::Aborted(_)
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
