//! Run entry points and process-level concerns.

pub mod api;
pub mod shutdown;

pub use api::{prepare_output_dirs, run_benchmarks, Orchestrator};
pub use shutdown::install_shutdown_handler;
