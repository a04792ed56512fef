//! Command-line entry point: run a job list and exit nonzero if any job failed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use bench_orchestrator::config::orchestrator::{
    ENV_ASV_ARGS, ENV_DOCKER_BIN, ENV_DOCKER_DIR, ENV_MAX_CONCURRENCY, ENV_NUM_CORES,
    ENV_OUTPUT_DIR,
};
use bench_orchestrator::config::OrchestratorConfig;
use bench_orchestrator::core::{AppResult, JobOutcome, RunSummary};
use bench_orchestrator::infra::load_job_list;
use bench_orchestrator::runtime::{install_shutdown_handler, run_benchmarks};
use bench_orchestrator::util::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "bench-orchestrator")]
#[command(version)]
#[command(about = "Run benchmark containers concurrently, each pinned to its own CPU cores")]
struct Args {
    /// JSON Lines job list with repo_name, commit_sha and asv_conf_path per line
    #[arg(long)]
    filtered_commits: PathBuf,

    /// Maximum number of containers to run in parallel [default: max(4, half the host cores)]
    #[arg(long, env = ENV_MAX_CONCURRENCY)]
    max_concurrency: Option<usize>,

    /// Additional arguments passed to asv inside each container
    #[arg(long, env = ENV_ASV_ARGS, default_value = "--quick", allow_hyphen_values = true)]
    asv_args: String,

    /// CPU cores dedicated to each container
    #[arg(long, env = ENV_NUM_CORES, default_value_t = 4)]
    num_cores: usize,

    /// Directory receiving logs/ and results/
    #[arg(long, env = ENV_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Directory containing the Dockerfile used to build missing images
    #[arg(long, env = ENV_DOCKER_DIR, default_value = "docker")]
    docker_dir: PathBuf,

    /// Docker executable
    #[arg(long, env = ENV_DOCKER_BIN, default_value = "docker")]
    docker_bin: PathBuf,
}

impl Args {
    fn into_config(self) -> AppResult<OrchestratorConfig> {
        let output_dir = std::path::absolute(&self.output_dir)
            .with_context(|| format!("resolving {}", self.output_dir.display()))?;
        let mut cfg = OrchestratorConfig::new(output_dir)
            .with_n_cores(self.num_cores.max(1))
            .with_extra_args(self.asv_args)
            .with_build_context(self.docker_dir)
            .with_docker_program(self.docker_bin);
        cfg.max_concurrency = self.max_concurrency;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing();

    match run(args).await {
        Ok(summary) if summary.is_success() => {
            info!("{}", summary.message());
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            for report in summary.failed_reports() {
                match &report.outcome {
                    JobOutcome::Completed(result) => warn!(
                        job = %report.label,
                        exit_code = result.exit_code,
                        log = %result.log_path.display(),
                        "job failed"
                    ),
                    JobOutcome::Failed { .. } => warn!(job = %report.label, "job faulted"),
                }
            }
            error!("{}", summary.message());
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> AppResult<RunSummary> {
    let job_list = args.filtered_commits.clone();
    let cfg = args.into_config()?;
    let jobs = load_job_list(&job_list).await?;
    let cancel = install_shutdown_handler().context("installing signal handlers")?;
    let summary = run_benchmarks(&cfg, jobs, cancel).await?;
    Ok(summary)
}
