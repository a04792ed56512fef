//! Run-level orchestrator configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable holding `max_concurrency`.
pub const ENV_MAX_CONCURRENCY: &str = "BENCH_MAX_CONCURRENCY";
/// Environment variable holding `n_cores`.
pub const ENV_NUM_CORES: &str = "BENCH_NUM_CORES";
/// Environment variable holding the extra benchmark flags.
pub const ENV_ASV_ARGS: &str = "BENCH_ASV_ARGS";
/// Environment variable holding the output directory.
pub const ENV_OUTPUT_DIR: &str = "BENCH_OUTPUT_DIR";
/// Environment variable holding the image build context directory.
pub const ENV_DOCKER_DIR: &str = "BENCH_DOCKER_DIR";
/// Environment variable holding the docker executable.
pub const ENV_DOCKER_BIN: &str = "BENCH_DOCKER_BIN";

/// Settings shared by every job of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Jobs allowed to run at once. `None` derives it from the host.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Dedicated cores per job.
    #[serde(default = "default_n_cores")]
    pub n_cores: usize,
    /// Extra flags appended to every job's benchmark invocation.
    #[serde(default = "default_extra_args")]
    pub extra_args: String,
    /// Root for `logs/` and `results/`.
    pub output_dir: PathBuf,
    /// Directory holding the Dockerfile used to build missing images.
    #[serde(default = "default_build_context")]
    pub build_context: PathBuf,
    /// Docker executable.
    #[serde(default = "default_docker_program")]
    pub docker_program: PathBuf,
    /// Where each job's result directory is mounted inside its container.
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
}

fn default_n_cores() -> usize {
    4
}

fn default_extra_args() -> String {
    "--quick".to_string()
}

fn default_build_context() -> PathBuf {
    PathBuf::from("docker")
}

fn default_docker_program() -> PathBuf {
    PathBuf::from("docker")
}

fn default_mount_point() -> String {
    "/output".to_string()
}

/// Concurrency used when none is configured: half the host cores, at least 4.
#[must_use]
pub fn default_max_concurrency(host_cores: usize) -> usize {
    (host_cores / 2).max(4)
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything but the output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_concurrency: None,
            n_cores: default_n_cores(),
            extra_args: default_extra_args(),
            output_dir: output_dir.into(),
            build_context: default_build_context(),
            docker_program: default_docker_program(),
            mount_point: default_mount_point(),
        }
    }

    /// Set the number of concurrent jobs.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Set the cores per job.
    #[must_use]
    pub const fn with_n_cores(mut self, n_cores: usize) -> Self {
        self.n_cores = n_cores;
        self
    }

    /// Set the extra benchmark flags.
    #[must_use]
    pub fn with_extra_args(mut self, extra_args: impl Into<String>) -> Self {
        self.extra_args = extra_args.into();
        self
    }

    /// Set the image build context.
    #[must_use]
    pub fn with_build_context(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_context = dir.into();
        self
    }

    /// Set the docker executable.
    #[must_use]
    pub fn with_docker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.docker_program = program.into();
        self
    }

    /// Concurrency to use on a host with `host_cores` cores.
    #[must_use]
    pub fn max_concurrency_for(&self, host_cores: usize) -> usize {
        self.max_concurrency
            .unwrap_or_else(|| default_max_concurrency(host_cores))
    }

    /// Per-job log directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    /// Parent of the per-job result directories.
    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("results")
    }

    /// Validate values that do not depend on the host.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_cores == 0 {
            return Err("n_cores must be greater than 0".into());
        }
        if self.max_concurrency == Some(0) {
            return Err("max_concurrency must be greater than 0".into());
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err("output_dir must not be empty".into());
        }
        if !Path::new(&self.mount_point).is_absolute() {
            return Err(format!(
                "mount_point must be an absolute path, got `{}`",
                self.mount_point
            ));
        }
        Ok(())
    }

    /// Validate, including the core budget of a host with `host_cores` cores.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate_for_host(&self, host_cores: usize) -> Result<(), String> {
        self.validate()?;
        let max_concurrency = self.max_concurrency_for(host_cores);
        match self.n_cores.checked_mul(max_concurrency) {
            Some(required) if required <= host_cores => Ok(()),
            _ => Err(format!(
                "n_cores ({}) * max_concurrency ({max_concurrency}) exceeds the {host_cores} \
                 cores available on this host",
                self.n_cores
            )),
        }
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
