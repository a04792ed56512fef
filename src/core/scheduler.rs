//! Dispatch loop mapping jobs onto core allocations.
//!
//! Every job gets its own task as soon as the run starts. A task suspends at
//! most twice: while waiting for a [`CoreLease`](super::CoreLease), and while
//! its process runs. How many jobs run at once is decided by the pool alone.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    build_audit_event, AuditSink, CoreAllocation, Job, JobOutcome, JobReport, JobResult,
    JobRunner, JobState, OrchestratorError, ResourcePool, RunSummary,
};

/// Shared handle on the optional audit sink.
#[derive(Clone)]
struct Recorder {
    run_id: Arc<str>,
    sink: Option<Arc<Mutex<dyn AuditSink>>>,
}

impl Recorder {
    fn record(&self, label: &str, index: usize, state: JobState, cores: Option<&CoreAllocation>) {
        if let Some(sink) = &self.sink {
            sink.lock().record(build_audit_event(
                self.run_id.as_ref(),
                label,
                index,
                state,
                cores.map(CoreAllocation::cpuset),
            ));
        }
    }
}

/// Runs a list of jobs with at most `pool.capacity()` of them in flight.
pub struct Scheduler<R: JobRunner> {
    pool: Arc<ResourcePool>,
    runner: Arc<R>,
    recorder: Recorder,
    cancel: CancellationToken,
}

impl<R: JobRunner> Scheduler<R> {
    /// Create a scheduler over `pool`, executing jobs with `runner`.
    pub fn new(pool: Arc<ResourcePool>, runner: Arc<R>) -> Self {
        Self {
            pool,
            runner,
            recorder: Recorder {
                run_id: Arc::from("run"),
                sink: None,
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Attach an audit sink receiving every job state transition.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<Mutex<dyn AuditSink>>) -> Self {
        self.recorder.sink = Some(sink);
        self
    }

    /// Tag audit events with `run_id`.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.recorder.run_id = Arc::from(run_id.into());
        self
    }

    /// Abort the run when `token` is cancelled.
    ///
    /// Jobs still waiting for cores fail without starting; running jobs are
    /// terminated through [`JobRunner::terminate`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the run.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The pool jobs are admitted through.
    #[must_use]
    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// Run every job to a terminal state and aggregate the outcomes.
    ///
    /// A failing or faulting job never affects its siblings. Reports in the
    /// returned summary follow submission order.
    pub async fn run(&self, jobs: Vec<Job>) -> RunSummary {
        if jobs.is_empty() {
            info!("no jobs submitted");
            return RunSummary::default();
        }

        info!(
            jobs = jobs.len(),
            max_concurrency = self.pool.capacity(),
            n_cores = self.pool.n_cores(),
            "scheduling jobs"
        );

        let mut handles = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.into_iter().enumerate() {
            let label = job.label(index);
            let job_id = job.id.clone();
            self.recorder.record(&label, index, JobState::Pending, None);

            let unit = JobUnit {
                index,
                label: label.clone(),
                job,
                pool: Arc::clone(&self.pool),
                runner: Arc::clone(&self.runner),
                recorder: self.recorder.clone(),
                cancel: self.cancel.clone(),
                state: JobState::Pending,
            };
            handles.push((index, label, job_id, tokio::spawn(unit.execute())));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (index, label, job_id, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(err) => {
                    let reason = if err.is_panic() {
                        "job task panicked"
                    } else {
                        "job task was cancelled"
                    };
                    error!(job = %label, error = %err, "{reason}");
                    let state = JobState::Failed(reason.to_string());
                    self.recorder.record(&label, index, state, None);
                    JobReport {
                        index,
                        label,
                        cores: None,
                        outcome: JobOutcome::Failed {
                            job_id,
                            reason: reason.to_string(),
                        },
                    }
                }
            };
            reports.push(report);
        }

        let summary = RunSummary::from_reports(reports);
        info!(
            jobs = summary.total(),
            failures = summary.failures(),
            "all jobs reached a terminal state"
        );
        summary
    }
}

/// One job's unit of concurrent work.
struct JobUnit<R: JobRunner> {
    index: usize,
    label: String,
    job: Job,
    pool: Arc<ResourcePool>,
    runner: Arc<R>,
    recorder: Recorder,
    cancel: CancellationToken,
    state: JobState,
}

impl<R: JobRunner> JobUnit<R> {
    async fn execute(mut self) -> JobReport {
        let acquired = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                let err = cancelled(&self.label, "before cores were allocated");
                return self.finish(None, Err(err));
            }
            lease = self.pool.acquire() => lease,
        };
        let lease = match acquired {
            Ok(lease) => lease,
            Err(err) => return self.finish(None, Err(err)),
        };

        let cores = lease.allocation().clone();
        self.advance(JobState::AllocationAcquired, Some(&cores));
        info!(job = %self.label, sha = %self.job.id, cores = %cores, "starting job");
        self.advance(JobState::Running, Some(&cores));

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                if let Err(err) = self.runner.terminate(self.index, &self.job).await {
                    warn!(job = %self.label, error = %err, "failed to terminate job");
                }
                Err(cancelled(&self.label, "while running"))
            }
            result = self.runner.run(self.index, &self.job, &cores) => result,
        };

        self.pool.release(lease);
        self.finish(Some(cores), result)
    }

    /// Move to `next` and record the transition.
    fn advance(&mut self, next: JobState, cores: Option<&CoreAllocation>) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal transition {} -> {} for {}",
            self.state.action(),
            next.action(),
            self.label
        );
        self.recorder.record(&self.label, self.index, next.clone(), cores);
        self.state = next;
    }

    fn finish(
        mut self,
        cores: Option<CoreAllocation>,
        result: Result<JobResult, OrchestratorError>,
    ) -> JobReport {
        let outcome = match result {
            Ok(result) => JobOutcome::Completed(result),
            Err(err) => JobOutcome::Failed {
                job_id: self.job.id.clone(),
                reason: err.to_string(),
            },
        };

        let state = outcome.state();
        let cpuset = cores.as_ref().map_or_else(|| "-".to_string(), CoreAllocation::cpuset);
        if outcome.is_failure() {
            warn!(job = %self.label, cores = %cpuset, status = %state, "job finished");
        } else {
            info!(job = %self.label, cores = %cpuset, status = %state, "job finished");
        }
        self.advance(state, cores.as_ref());

        JobReport {
            index: self.index,
            label: self.label,
            cores,
            outcome,
        }
    }
}

fn cancelled(label: &str, when: &str) -> OrchestratorError {
    OrchestratorError::runner_fault(label, format!("run aborted {when}"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::core::InMemoryAuditSink;

    #[derive(Clone)]
    struct SleepRunner;

    #[async_trait]
    impl JobRunner for SleepRunner {
        async fn run(
            &self,
            index: usize,
            job: &Job,
            _cores: &CoreAllocation,
        ) -> Result<JobResult, OrchestratorError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(JobResult {
                job_id: job.id.clone(),
                exit_code: 0,
                log_path: PathBuf::from(format!("{}.log", job.label(index))),
            })
        }
    }

    fn jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| Job::new(format!("sha{i:04}"), "asv.conf.json", "asv-test"))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_job_list_succeeds() {
        let pool = Arc::new(ResourcePool::with_host_cores(2, 1, 2).unwrap());
        let scheduler = Scheduler::new(pool, Arc::new(SleepRunner));
        let summary = scheduler.run(Vec::new()).await;
        assert!(summary.is_success());
        assert_eq!(summary.total(), 0);
    }

    #[tokio::test]
    async fn test_state_machine_is_recorded() {
        let pool = Arc::new(ResourcePool::with_host_cores(1, 1, 1).unwrap());
        let sink = Arc::new(Mutex::new(InMemoryAuditSink::new(64)));
        let scheduler = Scheduler::new(pool, Arc::new(SleepRunner))
            .with_run_id("test-run")
            .with_audit(sink.clone());

        let summary = scheduler.run(jobs(2)).await;
        assert!(summary.is_success());

        let sink = sink.lock();
        for index in 0..2 {
            assert_eq!(
                sink.states_for(index),
                vec![
                    JobState::Pending,
                    JobState::AllocationAcquired,
                    JobState::Running,
                    JobState::Completed(0),
                ]
            );
        }
        assert!(sink.events().iter().all(|e| e.run_id == "test-run"));
    }

    #[tokio::test]
    async fn test_reports_follow_submission_order() {
        let pool = Arc::new(ResourcePool::with_host_cores(3, 1, 3).unwrap());
        let scheduler = Scheduler::new(pool, Arc::new(SleepRunner));
        let summary = scheduler.run(jobs(7)).await;
        let indices: Vec<_> = summary.reports().iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
    }
}
