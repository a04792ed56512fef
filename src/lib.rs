//! # Bench Orchestrator
//!
//! Core-pinned, bounded-concurrency execution of containerised benchmark runs.
//!
//! Benchmarking many revisions of a project is only meaningful when runs do not
//! disturb each other. This crate runs every revision's benchmark suite inside
//! its own container, hard-pinned to a block of CPU cores no other running job
//! can touch, and reduces the individual exit statuses into a single verdict.
//!
//! ## How a run works
//!
//! - **Resource pool**: `[0, n_cores * max_concurrency)` is split into
//!   `max_concurrency` disjoint blocks. A job must lease a block before it
//!   starts; when none is free it waits. The pool is the only limit on
//!   parallelism.
//! - **Image provisioning**: every distinct image is checked (and built from its
//!   source if missing) exactly once, before any job starts. A failure aborts
//!   the run.
//! - **Scheduling**: one task per job, created up front. The lease is returned
//!   when the task ends, however it ends.
//! - **Verdict**: a run succeeds iff every job exited with status 0. Failing
//!   jobs never stop their siblings; their logs stay under
//!   `<output_dir>/logs/<label>.log`.
//!
//! ```rust,ignore
//! use bench_orchestrator::config::OrchestratorConfig;
//! use bench_orchestrator::infra::load_job_list;
//! use bench_orchestrator::runtime::{install_shutdown_handler, run_benchmarks};
//!
//! let cfg = OrchestratorConfig::new("/data/bench")
//!     .with_max_concurrency(2)
//!     .with_n_cores(4);
//! let jobs = load_job_list("commits.jsonl".as_ref()).await?;
//! let summary = run_benchmarks(&cfg, jobs, install_shutdown_handler()?).await?;
//! println!("{}", summary.message());
//! ```
//!
//! For custom runtimes implement [`core::JobRunner`] and [`core::ImageStore`]
//! and combine them with [`runtime::Orchestrator`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, core allocations and verdicts.
pub mod core;
/// Configuration models for runs.
pub mod config;
/// Builders to construct orchestrators from configuration.
pub mod builders;
/// Infrastructure adapters for docker and job list input.
pub mod infra;
/// Run entry points and signal handling.
pub mod runtime;
/// Shared utilities.
pub mod util;
