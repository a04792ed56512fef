//! End-to-end runs against a scripted stand-in for the docker CLI.
//!
//! The script keeps its state next to itself, so every test uses its own
//! image names and commit prefixes.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bench_orchestrator::config::OrchestratorConfig;
use bench_orchestrator::core::{
    ImageProvisioner, Job, JobOutcome, OrchestratorError, ResourcePool, Scheduler,
};
use bench_orchestrator::infra::{ContainerRunner, ContainerSettings, DockerCli};
use bench_orchestrator::runtime::{run_benchmarks, Orchestrator};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FAKE_DOCKER: &str = r#"#!/bin/sh
state="$(dirname "$0")/state"
mkdir -p "$state"
echo "$*" >> "$state/calls"
cmd="$1"
shift
for last in "$@"; do :; done
case "$cmd" in
  version)
    echo "24.0.7"
    ;;
  image)
    if [ ! -f "$state/image-$last" ]; then
      echo "Error: No such image: $last" >&2
      exit 1
    fi
    echo "sha256:0123456789"
    ;;
  build)
    echo "$2" >> "$state/builds"
    touch "$state/image-$2"
    ;;
  run)
    name= sha= cpus= volume=
    while [ $# -gt 1 ]; do
      case "$1" in
        --name) name="$2"; shift ;;
        --cpuset-cpus) cpus="$2"; shift ;;
        --volume) volume="$2"; shift ;;
        --env)
          case "$2" in COMMIT_SHA=*) sha="${2#COMMIT_SHA=}" ;; esac
          shift
          ;;
      esac
      shift
    done
    echo "$sha" > "$state/$name.sha"
    echo "$cpus" > "$state/$name.cpus"
    case "$sha" in
      *bad*) echo 3 > "$state/$name.code" ;;
      *) echo 0 > "$state/$name.code" ;;
    esac
    case "$sha" in
      *nostart*)
        echo "docker: Error response from daemon: invalid cpuset" >&2
        exit 125
        ;;
    esac
    echo "{\"commit\": \"$sha\"}" > "${volume%%:*}/result.json"
    echo "cid-$name"
    ;;
  logs)
    echo "running benchmarks for $(cat "$state/$last.sha") on cpus $(cat "$state/$last.cpus")"
    echo "asv: warning: machine not tuned" >&2
    case "$(cat "$state/$last.sha")" in
      *hang*) while [ -f "$state/$last.code" ]; do sleep 0.1; done ;;
    esac
    ;;
  wait)
    cat "$state/$last.code"
    ;;
  rm)
    rm -f "$state/$last.code"
    echo "$last"
    ;;
  *)
    echo "unknown command $cmd" >&2
    exit 2
    ;;
esac
"#;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Path of the fake docker executable, written once per test binary.
///
/// Every test calls this before spawning any process, so no child can inherit
/// the script's file handle while it is still open for writing.
fn fake_docker() -> &'static Path {
    static SCRIPT: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = SCRIPT.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker");
        std::fs::write(&path, FAKE_DOCKER).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::create_dir_all(dir.path().join("state")).unwrap();
        (dir, path)
    });
    path
}

fn state_dir() -> PathBuf {
    fake_docker().parent().unwrap().join("state")
}

fn docker_calls() -> String {
    std::fs::read_to_string(state_dir().join("calls")).unwrap_or_default()
}

fn orchestrator(
    output: &Path,
    max_concurrency: usize,
    cancel: CancellationToken,
) -> Orchestrator<DockerCli, ContainerRunner> {
    let docker = DockerCli::new(fake_docker(), output.join("docker"));
    let settings = ContainerSettings {
        extra_args: "--quick".into(),
        n_cores: 1,
        logs_dir: output.join("logs"),
        results_dir: output.join("results"),
        mount_point: "/output".into(),
    };
    let runner = ContainerRunner::new(docker.clone(), settings);
    let pool = ResourcePool::with_host_cores(max_concurrency, 1, max_concurrency).unwrap();
    let scheduler = Scheduler::new(Arc::new(pool), Arc::new(runner)).with_cancellation(cancel);
    Orchestrator::new(ImageProvisioner::new(docker), scheduler)
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_run_builds_shared_image_once_and_reports_failures() {
    let script = fake_docker();
    let output = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(output.path(), 2, CancellationToken::new());

    let source = "https://www.github.com/script/demo";
    let jobs = vec![
        Job::new("aaaaaaa111", "asv.conf.json", "asv-script-demo").with_image_source(source),
        Job::new("bad0000222", "asv.conf.json", "asv-script-demo").with_image_source(source),
        Job::new("ccccccc333", "asv.conf.json", "asv-script-demo").with_image_source(source),
    ];

    let summary = orchestrator.run(jobs).await.unwrap();

    assert_eq!(summary.total(), 3);
    assert_eq!(summary.failures(), 1);
    assert_eq!(summary.exit_codes(), vec![Some(0), Some(3), Some(0)]);
    assert_eq!(summary.message(), "1 job(s) failed");

    let builds = std::fs::read_to_string(state_dir().join("builds")).unwrap();
    assert_eq!(builds.lines().filter(|l| *l == "asv-script-demo").count(), 1);

    let log = std::fs::read_to_string(output.path().join("logs/asv_0_aaaaaaa.log")).unwrap();
    assert!(log.contains("running benchmarks for aaaaaaa111 on cpus "));
    assert!(log.contains("asv: warning: machine not tuned"));

    let failed_log = output.path().join("logs/asv_1_bad0000.log");
    assert_eq!(summary.reports()[1].label, "asv_1_bad0000");
    assert!(failed_log.exists());

    for label in ["asv_0_aaaaaaa", "asv_1_bad0000", "asv_2_ccccccc"] {
        let result = output.path().join("results").join(label).join("result.json");
        assert!(result.exists(), "missing {}", result.display());
        assert!(!state_dir().join(format!("{label}.code")).exists(), "{label} not removed");
    }

    let calls = std::fs::read_to_string(state_dir().join("calls")).unwrap();
    assert!(calls.contains("rm --force asv_1_bad0000"));
    assert!(calls.contains("ASV_ARGS=--quick --cpu-affinity"));
    assert!(script.exists());
}

#[tokio::test]
async fn test_missing_image_without_source_starts_no_container() {
    fake_docker();
    let output = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(output.path(), 1, CancellationToken::new());

    let jobs = vec![Job::new("fffffff000", "asv.conf.json", "asv-script-absent")];
    let err = orchestrator.run(jobs).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Infrastructure(_)));
    assert!(!state_dir().join("asv_0_fffffff.sha").exists());
    assert!(!output.path().join("logs/asv_0_fffffff.log").exists());
}

#[tokio::test]
async fn test_run_benchmarks_end_to_end() {
    let script = fake_docker();
    let output = tempfile::tempdir().unwrap();
    let cfg = OrchestratorConfig::new(output.path())
        .with_max_concurrency(1)
        .with_n_cores(1)
        .with_docker_program(script)
        .with_build_context(output.path());

    let jobs = vec![Job::new("ddddddd444", "bench/asv.conf.json", "asv-script-direct")
        .with_image_source("https://www.github.com/script/direct")];
    let summary = run_benchmarks(&cfg, jobs, CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.exit_code(), 0);
    assert!(output.path().join("logs/asv_0_ddddddd.log").exists());
    assert_eq!(
        std::fs::read_to_string(state_dir().join("asv_0_ddddddd.cpus")).unwrap().trim(),
        "0"
    );
}

#[tokio::test]
async fn test_unreachable_docker_is_fatal() {
    fake_docker();
    let output = tempfile::tempdir().unwrap();
    let cfg = OrchestratorConfig::new(output.path())
        .with_max_concurrency(1)
        .with_n_cores(1)
        .with_docker_program(output.path().join("no-such-docker"));

    let jobs = vec![Job::new("eeeeeee555", "asv.conf.json", "asv-script-never")];
    let err = run_benchmarks(&cfg, jobs, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, OrchestratorError::Infrastructure(_)));
}

#[tokio::test]
async fn test_failed_start_removes_container_and_logs_reason() {
    fake_docker();
    let output = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(output.path(), 1, CancellationToken::new());
    std::fs::write(state_dir().join("image-asv-script-nostart"), "").unwrap();

    let jobs = vec![Job::new("nostart999", "asv.conf.json", "asv-script-nostart")];
    let summary = orchestrator.run(jobs).await.unwrap();

    assert_eq!(summary.failures(), 1);
    let report = &summary.reports()[0];
    assert!(matches!(
        &report.outcome,
        JobOutcome::Failed { reason, .. } if reason.contains("invalid cpuset")
    ));

    let stats = orchestrator.scheduler().pool().stats();
    assert_eq!(stats.available, stats.capacity);
    assert!(docker_calls().contains("rm --force asv_0_nostart"));
    assert!(!state_dir().join("asv_0_nostart.code").exists());

    let log = std::fs::read_to_string(output.path().join("logs/asv_0_nostart.log")).unwrap();
    assert!(log.contains("[bench-orchestrator] runner fault for job asv_0_nostart"));
    assert!(log.contains("invalid cpuset"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_mid_run_removes_container() {
    fake_docker();
    let output = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let orchestrator = Arc::new(orchestrator(output.path(), 1, cancel.clone()));
    std::fs::write(state_dir().join("image-asv-script-hang"), "").unwrap();

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let jobs = vec![Job::new("hang777abc", "asv.conf.json", "asv-script-hang")];
        tokio::spawn(async move { orchestrator.run(jobs).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while !docker_calls().contains("logs --follow asv_0_hang777") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("container never started");
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("run did not stop after abort")
        .unwrap()
        .unwrap();

    assert_eq!(summary.failures(), 1);
    assert!(matches!(
        &summary.reports()[0].outcome,
        JobOutcome::Failed { reason, .. } if reason.contains("aborted")
    ));
    let removals = docker_calls()
        .lines()
        .filter(|call| *call == "rm --force asv_0_hang777")
        .count();
    assert!(removals >= 2, "expected a second removal, saw {removals}");
    assert!(!state_dir().join("asv_0_hang777.code").exists());

    let stats = orchestrator.scheduler().pool().stats();
    assert_eq!(stats.available, stats.capacity);

    let log = std::fs::read_to_string(output.path().join("logs/asv_0_hang777.log")).unwrap();
    assert!(log.contains("[bench-orchestrator] run aborted"));
}
