//! Jobs, their lifecycle states and per-job results.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::CoreAllocation;

/// One benchmark run for a single revision. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Revision label, usually a commit sha.
    pub id: String,
    /// Path of the run configuration inside the image.
    pub config_path: String,
    /// Image the job runs in.
    pub image: String,
    /// Build reference used when the image has to be built locally.
    #[serde(default)]
    pub image_source: Option<String>,
}

impl Job {
    /// Create a job without an image build source.
    pub fn new(
        id: impl Into<String>,
        config_path: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            config_path: config_path.into(),
            image: image.into(),
            image_source: None,
        }
    }

    /// Attach the reference the image is built from.
    #[must_use]
    pub fn with_image_source(mut self, source: impl Into<String>) -> Self {
        self.image_source = Some(source.into());
        self
    }

    /// Label used for container names, log files and result directories.
    ///
    /// `index` is the job's position in the submitted list, which keeps labels
    /// unique when the same revision is submitted twice.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        let short: String = self.id.chars().take(7).collect();
        format!("asv_{index}_{short}")
    }
}

/// Lifecycle of a job inside one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Submitted, waiting for an allocation.
    Pending,
    /// Holds a core allocation, process not yet launched.
    AllocationAcquired,
    /// Isolated process launched.
    Running,
    /// Process terminated with this exit code.
    Completed(i32),
    /// The orchestration layer itself failed for this job.
    Failed(String),
}

impl JobState {
    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::AllocationAcquired | Self::Failed(_))
                | (Self::AllocationAcquired, Self::Running | Self::Failed(_))
                | (Self::Running, Self::Completed(_) | Self::Failed(_))
        )
    }

    /// Short action name used in audit events.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AllocationAcquired => "allocation_acquired",
            Self::Running => "running",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(0) => write!(f, "OK"),
            Self::Completed(code) => write!(f, "FAIL({code})"),
            Self::Failed(reason) => write!(f, "FAULT({reason})"),
            other => f.write_str(other.action()),
        }
    }
}

/// What a job runner reports once the process has terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Identifier of the job.
    pub job_id: String,
    /// Exit status of the isolated process.
    pub exit_code: i32,
    /// Where the combined process output was written.
    pub log_path: PathBuf,
}

impl JobResult {
    /// Whether the process exited with status 0.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Terminal outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// The process ran to termination, with any exit code.
    Completed(JobResult),
    /// The runner or the scheduler faulted before an exit code was observed.
    Failed {
        /// Identifier of the job.
        job_id: String,
        /// Fault description.
        reason: String,
    },
}

impl JobOutcome {
    /// Whether this outcome counts towards the failure total.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        match self {
            Self::Completed(result) => !result.succeeded(),
            Self::Failed { .. } => true,
        }
    }

    /// Terminal state matching this outcome.
    #[must_use]
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed(result) => JobState::Completed(result.exit_code),
            Self::Failed { reason, .. } => JobState::Failed(reason.clone()),
        }
    }
}

/// Everything known about a job once it reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Position in the submitted job list.
    pub index: usize,
    /// Job label (container and log name).
    pub label: String,
    /// Cores the job ran on, if it got that far.
    pub cores: Option<CoreAllocation>,
    /// Terminal outcome.
    pub outcome: JobOutcome,
}
