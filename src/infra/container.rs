//! Docker-backed [`JobRunner`].
//!
//! Each job becomes one detached container named after the job label, pinned
//! with `--cpuset-cpus` to its allocation. Its combined output is appended to
//! `<logs>/<label>.log` line by line while it runs, and the container is
//! removed once its exit status has been read, or once starting or observing
//! it failed. Such faults are also appended to the job's log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::docker::{stderr_tail, DockerCli};
use crate::config::OrchestratorConfig;
use crate::core::{CoreAllocation, Job, JobResult, JobRunner, OrchestratorError};

/// Per-run settings applied to every container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    /// Flags prepended to the generated benchmark arguments.
    pub extra_args: String,
    /// Cores per job, passed to the benchmark as its parallelism.
    pub n_cores: usize,
    /// Directory receiving `<label>.log` files.
    pub logs_dir: PathBuf,
    /// Parent of the per-job result directories.
    pub results_dir: PathBuf,
    /// Mount point of the result directory inside the container.
    pub mount_point: String,
}

impl From<&OrchestratorConfig> for ContainerSettings {
    fn from(cfg: &OrchestratorConfig) -> Self {
        Self {
            extra_args: cfg.extra_args.clone(),
            n_cores: cfg.n_cores,
            logs_dir: cfg.logs_dir(),
            results_dir: cfg.results_dir(),
            mount_point: cfg.mount_point.clone(),
        }
    }
}

/// Runs jobs as core-pinned docker containers.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    docker: DockerCli,
    settings: ContainerSettings,
}

impl ContainerRunner {
    /// Create a runner driving `docker` with `settings`.
    pub const fn new(docker: DockerCli, settings: ContainerSettings) -> Self {
        Self { docker, settings }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Log file of the job labelled `label`.
    #[must_use]
    pub fn log_path(&self, label: &str) -> PathBuf {
        self.settings.logs_dir.join(format!("{label}.log"))
    }

    /// Host directory mounted into the job labelled `label`.
    #[must_use]
    pub fn result_dir(&self, label: &str) -> PathBuf {
        self.settings.results_dir.join(label)
    }

    /// Benchmark flags for a job pinned to `cores`.
    #[must_use]
    pub fn asv_args(&self, cores: &CoreAllocation) -> String {
        let generated = format!(
            "--cpu-affinity {} --parallel {}",
            cores.cpuset(),
            self.settings.n_cores
        );
        let extra = self.settings.extra_args.trim();
        if extra.is_empty() {
            generated
        } else {
            format!("{extra} {generated}")
        }
    }

    /// Arguments of the `docker run` invocation for one job.
    #[must_use]
    pub fn run_args(&self, label: &str, job: &Job, cores: &CoreAllocation) -> Vec<String> {
        let volume = format!(
            "{}:{}:rw",
            self.result_dir(label).display(),
            self.settings.mount_point
        );
        vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            label.into(),
            "--cpuset-cpus".into(),
            cores.cpuset(),
            "--env".into(),
            format!("COMMIT_SHA={}", job.id),
            "--env".into(),
            format!("ASV_CONF_PATH={}", job.config_path),
            "--env".into(),
            format!("ASV_ARGS={}", self.asv_args(cores)),
            "--volume".into(),
            volume,
            job.image.clone(),
        ]
    }

    async fn start(&self, label: &str, args: &[String]) -> Result<String, OrchestratorError> {
        let output = self
            .docker
            .output(args)
            .await
            .map_err(|e| OrchestratorError::runner_fault(label, format!("docker run: {e}")))?;
        if !output.status.success() {
            return Err(OrchestratorError::runner_fault(
                label,
                format!("docker run failed: {}", stderr_tail(&output)),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Start the container and follow it until it exits.
    async fn supervise(
        &self,
        label: &str,
        args: &[String],
        log: &mut File,
    ) -> Result<i32, OrchestratorError> {
        let container_id = self.start(label, args).await?;
        info!(job = label, container = %container_id, "container started, waiting for it to finish");
        self.observe(label, log).await
    }

    /// Follow the container's output into `log` until it stops, then read its
    /// exit status.
    async fn observe(&self, label: &str, log: &mut File) -> Result<i32, OrchestratorError> {
        let fault = |e: std::io::Error| OrchestratorError::runner_fault(label, e);

        let mut follower = self
            .docker
            .command()
            .args(["logs", "--follow", label])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(fault)?;

        let stdout = follower.stdout.take();
        let stderr = follower.stderr.take();
        if let (Some(stdout), Some(stderr)) = (stdout, stderr) {
            pump_output(stdout, stderr, log).await.map_err(fault)?;
        }
        let status = follower.wait().await.map_err(fault)?;
        if !status.success() {
            warn!(job = label, %status, "log follower exited abnormally");
        }

        debug!(job = label, "waiting for container to exit");
        let output = self
            .docker
            .output(["wait", label])
            .await
            .map_err(fault)?;
        if !output.status.success() {
            return Err(OrchestratorError::runner_fault(
                label,
                format!("docker wait failed: {}", stderr_tail(&output)),
            ));
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim().parse::<i32>().map_err(|e| {
            OrchestratorError::runner_fault(
                label,
                format!("unreadable exit status `{}`: {e}", raw.trim()),
            )
        })
    }
}

#[async_trait]
impl JobRunner for ContainerRunner {
    async fn run(
        &self,
        index: usize,
        job: &Job,
        cores: &CoreAllocation,
    ) -> Result<JobResult, OrchestratorError> {
        let label = job.label(index);
        let fault = |e: std::io::Error| OrchestratorError::runner_fault(&label, e);

        fs::create_dir_all(self.result_dir(&label)).await.map_err(fault)?;
        fs::create_dir_all(&self.settings.logs_dir).await.map_err(fault)?;
        let log_path = self.log_path(&label);
        let mut log = open_log(&log_path).await.map_err(fault)?;

        let args = self.run_args(&label, job, cores);
        info!(
            "$ {} {}",
            self.docker.program().display(),
            shell_words(&args)
        );
        let supervised = self.supervise(&label, &args, &mut log).await;
        if let Err(err) = self.docker.remove_container(&label).await {
            warn!(job = %label, error = %err, "failed to remove container");
        }
        let exit_code = match supervised {
            Ok(exit_code) => exit_code,
            Err(err) => {
                note_in_log(&mut log, &label, &err.to_string()).await;
                return Err(err);
            }
        };
        info!(job = %label, exit_code, "container exited");

        Ok(JobResult {
            job_id: job.id.clone(),
            exit_code,
            log_path,
        })
    }

    async fn terminate(&self, index: usize, job: &Job) -> Result<(), OrchestratorError> {
        let label = job.label(index);
        warn!(job = %label, "terminating container");
        if let Ok(mut log) = open_log(&self.log_path(&label)).await {
            note_in_log(&mut log, &label, "run aborted, removing container").await;
        }

        let first = self.docker.remove_container(&label).await;
        // A `docker run` client killed mid-request may still have a create
        // pending at the daemon, so the name can reappear after the first rm.
        tokio::time::sleep(TERMINATE_SETTLE).await;
        let second = self.docker.remove_container(&label).await;
        first.or(second)
    }
}

/// Delay between the two removals issued by [`ContainerRunner::terminate`].
const TERMINATE_SETTLE: Duration = Duration::from_millis(500);

async fn open_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Append an orchestrator message to a job log. Failures are only logged.
async fn note_in_log(log: &mut File, label: &str, message: &str) {
    let line = format!("[bench-orchestrator] {message}\n");
    let written = match log.write_all(line.as_bytes()).await {
        Ok(()) => log.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        warn!(job = label, error = %e, "could not write to job log");
    }
}

/// Copy both output streams into `log` as lines arrive, flushing each one.
async fn pump_output<O, E>(stdout: O, stderr: E, log: &mut File) -> std::io::Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');
    let (mut stdout_open, mut stderr_open) = (true, true);

    while stdout_open || stderr_open {
        let line = tokio::select! {
            line = stdout.next_segment(), if stdout_open => {
                let line = line?;
                stdout_open = line.is_some();
                line
            }
            line = stderr.next_segment(), if stderr_open => {
                let line = line?;
                stderr_open = line.is_some();
                line
            }
        };
        if let Some(mut line) = line {
            line.push(b'\n');
            log.write_all(&line).await?;
            log.flush().await?;
        }
    }
    Ok(())
}

/// Render arguments the way a user would type them.
fn shell_words(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(extra_args: &str) -> ContainerRunner {
        ContainerRunner::new(
            DockerCli::new("docker", "docker"),
            ContainerSettings {
                extra_args: extra_args.into(),
                n_cores: 4,
                logs_dir: PathBuf::from("/out/logs"),
                results_dir: PathBuf::from("/out/results"),
                mount_point: "/output".into(),
            },
        )
    }

    #[test]
    fn test_asv_args_pin_cores() {
        let cores = &CoreAllocation::partition(2, 4)[1];
        assert_eq!(
            runner("--quick").asv_args(cores),
            "--quick --cpu-affinity 4,5,6,7 --parallel 4"
        );
        assert_eq!(
            runner("  ").asv_args(cores),
            "--cpu-affinity 4,5,6,7 --parallel 4"
        );
    }

    #[test]
    fn test_run_args() {
        let runner = runner("--quick");
        let job = Job::new("deadbeefcafe", "asv.conf.json", "asv-org-repo");
        let cores = &CoreAllocation::partition(1, 2)[0];
        let label = job.label(5);
        let args = runner.run_args(&label, &job, cores);

        assert_eq!(&args[..6], &["run", "--detach", "--name", "asv_5_deadbee", "--cpuset-cpus", "0,1"]);
        assert!(args.contains(&"COMMIT_SHA=deadbeefcafe".to_string()));
        assert!(args.contains(&"ASV_CONF_PATH=asv.conf.json".to_string()));
        assert!(args.contains(&"ASV_ARGS=--quick --cpu-affinity 0,1 --parallel 4".to_string()));
        assert!(args.contains(&"/out/results/asv_5_deadbee:/output:rw".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("asv-org-repo"));
    }

    #[test]
    fn test_log_path() {
        assert_eq!(
            runner("").log_path("asv_0_abc"),
            PathBuf::from("/out/logs/asv_0_abc.log")
        );
    }

    #[test]
    fn test_shell_words_quotes_spaces() {
        let args = vec!["run".to_string(), "ASV_ARGS=--quick --parallel 4".to_string()];
        assert_eq!(shell_words(&args), "run 'ASV_ARGS=--quick --parallel 4'");
    }

    #[tokio::test]
    async fn test_pump_output_interleaves_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let mut log = open_log(&path).await.unwrap();

        let stdout: &[u8] = b"one\ntwo\n";
        let stderr: &[u8] = b"warn\n";
        pump_output(stdout, stderr, &mut log).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let mut lines: Vec<&str> = written.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["one", "two", "warn"]);
    }

    #[tokio::test]
    async fn test_log_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        for chunk in [&b"first\n"[..], &b"second"[..]] {
            let mut log = open_log(&path).await.unwrap();
            pump_output(chunk, &b""[..], &mut log).await.unwrap();
        }
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_fault_note_follows_container_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let mut log = open_log(&path).await.unwrap();
        pump_output(&b"partial output\n"[..], &b""[..], &mut log).await.unwrap();

        let err = OrchestratorError::runner_fault("asv_0_abcdef0", "docker wait failed: gone");
        note_in_log(&mut log, "asv_0_abcdef0", &err.to_string()).await;

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            written,
            "partial output\n[bench-orchestrator] runner fault for job asv_0_abcdef0: \
             docker wait failed: gone\n"
        );
    }
}
