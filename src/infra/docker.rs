//! Thin wrapper over the `docker` command line.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::{ImageStore, OrchestratorError};

/// Handle on a docker executable plus the build context used for images.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
    build_context: PathBuf,
}

impl DockerCli {
    /// Use `program` as the docker executable and `build_context` as the
    /// directory holding the benchmark Dockerfile.
    pub fn new(program: impl Into<PathBuf>, build_context: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            build_context: build_context.into(),
        }
    }

    /// The docker executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// A `docker` command with stdin closed. Children are killed if the
    /// command's future is dropped.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Run `docker <args>` to completion, capturing its output.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the executable could not be started.
    pub async fn output<I, S>(&self, args: I) -> std::io::Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
    }

    /// Check that the docker daemon answers.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Infrastructure`] if it does not.
    pub async fn ping(&self) -> Result<(), OrchestratorError> {
        let output = self
            .output(["version", "--format", "{{.Server.Version}}"])
            .await
            .map_err(|e| {
                OrchestratorError::Infrastructure(format!(
                    "could not run {}: {e}",
                    self.program.display()
                ))
            })?;
        if !output.status.success() {
            return Err(OrchestratorError::Infrastructure(format!(
                "could not connect to the docker daemon: {}",
                stderr_tail(&output)
            )));
        }
        tracing::debug!(
            server = %String::from_utf8_lossy(&output.stdout).trim(),
            "docker daemon reachable"
        );
        Ok(())
    }

    /// Force-remove a container, killing it first if it still runs.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::RunnerFault`] if docker refuses.
    pub async fn remove_container(&self, name: &str) -> Result<(), OrchestratorError> {
        let output = self
            .output(["rm", "--force", name])
            .await
            .map_err(|e| OrchestratorError::runner_fault(name, e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(OrchestratorError::runner_fault(
                name,
                format!("docker rm failed: {}", stderr_tail(&output)),
            ))
        }
    }
}

#[async_trait]
impl ImageStore for DockerCli {
    async fn image_exists(&self, name: &str) -> Result<bool, OrchestratorError> {
        let output = self
            .output(["image", "inspect", "--format", "{{.Id}}", name])
            .await
            .map_err(|e| {
                OrchestratorError::Infrastructure(format!("could not inspect image {name}: {e}"))
            })?;
        Ok(output.status.success())
    }

    async fn build_image(&self, name: &str, source: &str) -> Result<(), OrchestratorError> {
        let build_arg = format!("REPO_URL={source}");
        let output = self
            .command()
            .arg("build")
            .args(["--tag", name, "--build-arg", &build_arg])
            .arg(&self.build_context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                OrchestratorError::Infrastructure(format!("failed to build image {name}: {e}"))
            })?;

        if output.status.success() {
            tracing::info!(image = name, "image built");
            Ok(())
        } else {
            Err(OrchestratorError::Infrastructure(format!(
                "failed to build image {name}: {}",
                stderr_tail(&output)
            )))
        }
    }
}

/// Last few lines of a command's stderr, for error messages.
pub(crate) fn stderr_tail(output: &Output) -> String {
    const TAIL_LINES: usize = 5;
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let tail = lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n");
    if tail.is_empty() {
        format!("exited with {}", output.status)
    } else {
        tail
    }
}
