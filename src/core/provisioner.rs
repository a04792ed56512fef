//! Image provisioning ahead of scheduling.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Job, OrchestratorError};

/// Local image storage of a container runtime.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Whether an image called `name` exists locally.
    async fn image_exists(&self, name: &str) -> Result<bool, OrchestratorError>;

    /// Build the image `name` from the build reference `source`.
    async fn build_image(&self, name: &str, source: &str) -> Result<(), OrchestratorError>;
}

/// What [`ImageProvisioner::ensure`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// Already confirmed earlier in this run; the store was not consulted.
    Cached,
    /// Found locally.
    Present,
    /// Built from its source reference.
    Built,
}

/// Makes sure every image a run needs exists, consulting the store at most
/// once per distinct image name.
pub struct ImageProvisioner<S> {
    store: S,
    registry: Mutex<HashSet<String>>,
}

impl<S: ImageStore> ImageProvisioner<S> {
    /// Create a provisioner with an empty registry.
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: Mutex::new(HashSet::new()),
        }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Whether `name` has been confirmed present during this run.
    pub fn is_confirmed(&self, name: &str) -> bool {
        self.registry.lock().contains(name)
    }

    /// Ensure `name` exists locally, building it from `source` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Infrastructure`] when the image is absent
    /// and has no source, when the build fails, or when the image is still
    /// missing after a build.
    pub async fn ensure(
        &self,
        name: &str,
        source: Option<&str>,
    ) -> Result<Provisioned, OrchestratorError> {
        if self.is_confirmed(name) {
            return Ok(Provisioned::Cached);
        }

        let outcome = if self.store.image_exists(name).await? {
            tracing::info!(image = name, "image found locally");
            Provisioned::Present
        } else {
            let Some(source) = source.filter(|s| !s.is_empty()) else {
                return Err(OrchestratorError::Infrastructure(format!(
                    "image {name} not found locally and no build source was given"
                )));
            };
            tracing::info!(image = name, source, "image not found locally, building it");
            self.store.build_image(name, source).await?;
            if !self.store.image_exists(name).await? {
                return Err(OrchestratorError::Infrastructure(format!(
                    "image {name} still missing after a successful build"
                )));
            }
            Provisioned::Built
        };

        self.registry.lock().insert(name.to_string());
        Ok(outcome)
    }

    /// Ensure the image of every job, in submission order. Stops at the first
    /// failure.
    ///
    /// Returns how many distinct images were checked.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ImageProvisioner::ensure`] failure.
    pub async fn provision_all(&self, jobs: &[Job]) -> Result<usize, OrchestratorError> {
        let mut checked = 0;
        for job in jobs {
            if self.ensure(&job.image, job.image_source.as_deref()).await? != Provisioned::Cached {
                checked += 1;
            }
        }
        Ok(checked)
    }
}
