//! Reduction of per-job outcomes into a run verdict.

use serde::{Deserialize, Serialize};

use super::{JobOutcome, JobReport};

/// Aggregate verdict of a run, with every per-job report kept intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    reports: Vec<JobReport>,
    failures: usize,
}

impl RunSummary {
    /// Build a summary. Reports are ordered by submission index.
    #[must_use]
    pub fn from_reports(mut reports: Vec<JobReport>) -> Self {
        reports.sort_by_key(|r| r.index);
        let failures = reports.iter().filter(|r| r.outcome.is_failure()).count();
        Self { reports, failures }
    }

    /// Number of jobs that ran.
    #[must_use]
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    /// Jobs that exited nonzero or faulted.
    #[must_use]
    pub const fn failures(&self) -> usize {
        self.failures
    }

    /// Success iff no job failed. An empty run is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failures == 0
    }

    /// Per-job reports in submission order.
    #[must_use]
    pub fn reports(&self) -> &[JobReport] {
        &self.reports
    }

    /// Reports of the failed jobs only.
    pub fn failed_reports(&self) -> impl Iterator<Item = &JobReport> {
        self.reports.iter().filter(|r| r.outcome.is_failure())
    }

    /// Exit codes observed, in submission order. Faulted jobs have none.
    #[must_use]
    pub fn exit_codes(&self) -> Vec<Option<i32>> {
        self.reports
            .iter()
            .map(|r| match &r.outcome {
                JobOutcome::Completed(result) => Some(result.exit_code),
                JobOutcome::Failed { .. } => None,
            })
            .collect()
    }

    /// Human-readable verdict line.
    #[must_use]
    pub fn message(&self) -> String {
        if self.is_success() {
            format!("all {} job(s) finished successfully", self.total())
        } else {
            format!("{} job(s) failed", self.failures)
        }
    }

    /// Process exit status for this verdict.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}
