//! Infrastructure adapters: the docker runtime and job list input.

pub mod container;
pub mod docker;
pub mod joblist;

pub use container::{ContainerRunner, ContainerSettings};
pub use docker::DockerCli;
pub use joblist::{load_job_list, parse_job_list};
