//! Job list input: one JSON object per line describing a commit to benchmark.
//!
//! ```text
//! {"repo_name": "scikit-learn/scikit-learn", "commit_sha": "8f1c0d2...", "asv_conf_path": ["asv_benchmarks/asv.conf.json"]}
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::core::{Job, OrchestratorError};

#[derive(Debug, Deserialize)]
struct CommitRecord {
    repo_name: String,
    commit_sha: String,
    asv_conf_path: ConfPaths,
}

/// Either a single configuration path or the list produced by discovery.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConfPaths {
    One(String),
    Many(Vec<String>),
}

impl ConfPaths {
    fn first(self) -> Option<String> {
        match self {
            Self::One(path) => Some(path),
            Self::Many(paths) => paths.into_iter().next(),
        }
    }
}

/// Image name for a repository: `owner/repo` becomes `asv-owner-repo`.
///
/// Docker only accepts lowercase repository names, so the result is lowercased.
#[must_use]
pub fn image_name_for(repo_name: &str) -> String {
    let mut parts = repo_name.trim_matches('/').rsplit('/');
    let repo = parts.next().unwrap_or_default();
    let owner = parts.next().unwrap_or_default();
    format!("asv-{owner}-{repo}").to_lowercase()
}

/// Build source of a repository's image.
#[must_use]
pub fn repo_url_for(repo_name: &str) -> String {
    format!("https://www.github.com/{}", repo_name.trim_matches('/'))
}

/// Parse a JSON Lines job list. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`OrchestratorError::Configuration`] naming the first bad line.
pub fn parse_job_list(input: &str) -> Result<Vec<Job>, OrchestratorError> {
    let mut jobs = Vec::new();
    for (n, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = n + 1;
        let record: CommitRecord = serde_json::from_str(line).map_err(|e| {
            OrchestratorError::Configuration(format!("job list line {line_no}: {e}"))
        })?;
        let config_path = record.asv_conf_path.first().ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "job list line {line_no}: asv_conf_path is empty"
            ))
        })?;
        jobs.push(
            Job::new(record.commit_sha, config_path, image_name_for(&record.repo_name))
                .with_image_source(repo_url_for(&record.repo_name)),
        );
    }
    Ok(jobs)
}

/// Read and parse a job list file.
///
/// # Errors
///
/// Returns [`OrchestratorError::Configuration`] if the file cannot be read or
/// parsed.
pub async fn load_job_list(path: &Path) -> Result<Vec<Job>, OrchestratorError> {
    let input = tokio::fs::read_to_string(path).await.map_err(|e| {
        OrchestratorError::Configuration(format!("cannot read job list {}: {e}", path.display()))
    })?;
    let jobs = parse_job_list(&input)?;
    tracing::info!(path = %path.display(), jobs = jobs.len(), "job list loaded");
    Ok(jobs)
}
