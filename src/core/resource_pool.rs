//! Fixed-capacity pool of disjoint CPU-core allocations.
//!
//! The pool is the only concurrency gate of a run: a job may only start once it
//! holds a [`CoreLease`], and at most `max_concurrency` leases exist at a time.
//!
//! Admission uses a `tokio::sync::Semaphore` with one permit per allocation, so
//! waiters are served in FIFO order. The allocations themselves live in an
//! explicit registry (free list plus held set) behind a `parking_lot::Mutex`,
//! which keeps the no-overlap invariant checkable at every checkout.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::{CoreAllocation, OrchestratorError};

/// Point-in-time view of pool utilisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of allocations the pool was built with.
    pub capacity: usize,
    /// Cores per allocation.
    pub n_cores: usize,
    /// Allocations currently free.
    pub available: usize,
    /// Allocations currently leased out.
    pub held: usize,
    /// Highest number of simultaneously held allocations seen so far.
    pub peak_held: usize,
    /// Total successful acquisitions.
    pub acquired: u64,
    /// Total releases.
    pub released: u64,
}

/// Allocation registry shared between the pool and its outstanding leases.
#[derive(Debug)]
struct PoolState {
    available: VecDeque<CoreAllocation>,
    held: Vec<CoreAllocation>,
    peak_held: usize,
    acquired: u64,
    released: u64,
}

impl PoolState {
    fn checkout(&mut self) -> Result<CoreAllocation, OrchestratorError> {
        let allocation = self.available.pop_front().ok_or_else(|| {
            OrchestratorError::Infrastructure("admission granted with no free core allocation".into())
        })?;

        if let Some(clash) = self.held.iter().find(|held| held.overlaps(&allocation)) {
            let message = format!(
                "core allocation {allocation} overlaps held allocation {clash}"
            );
            self.available.push_front(allocation);
            return Err(OrchestratorError::Infrastructure(message));
        }

        self.held.push(allocation.clone());
        self.peak_held = self.peak_held.max(self.held.len());
        self.acquired += 1;
        Ok(allocation)
    }

    fn checkin(&mut self, allocation: CoreAllocation) {
        if let Some(pos) = self.held.iter().position(|held| *held == allocation) {
            self.held.swap_remove(pos);
        }
        self.available.push_back(allocation);
        self.released += 1;
    }
}

/// Exclusive hold on one [`CoreAllocation`].
///
/// Dropping the lease returns the allocation to its pool, so release happens on
/// every exit path of the holder, including errors and panics.
#[derive(Debug)]
pub struct CoreLease {
    allocation: CoreAllocation,
    state: Arc<Mutex<PoolState>>,
    // Dropped after `Drop::drop` has put the allocation back on the free list,
    // so a woken waiter always finds one.
    _permit: OwnedSemaphorePermit,
}

impl CoreLease {
    /// The leased cores.
    #[must_use]
    pub const fn allocation(&self) -> &CoreAllocation {
        &self.allocation
    }
}

impl Drop for CoreLease {
    fn drop(&mut self) {
        self.state.lock().checkin(self.allocation.clone());
        tracing::debug!(cores = %self.allocation, "released core allocation");
    }
}

/// Pool of `max_concurrency` disjoint blocks of `n_cores` CPU cores each.
#[derive(Debug)]
pub struct ResourcePool {
    max_concurrency: usize,
    n_cores: usize,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<PoolState>>,
}

impl ResourcePool {
    /// Create a pool checked against the cores of this host.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Configuration`] when either knob is zero or
    /// `n_cores * max_concurrency` exceeds the host core count.
    pub fn new(max_concurrency: usize, n_cores: usize) -> Result<Self, OrchestratorError> {
        Self::with_host_cores(max_concurrency, n_cores, num_cpus::get())
    }

    /// Create a pool checked against an explicit host core count.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::new`].
    pub fn with_host_cores(
        max_concurrency: usize,
        n_cores: usize,
        host_cores: usize,
    ) -> Result<Self, OrchestratorError> {
        if max_concurrency == 0 {
            return Err(OrchestratorError::Configuration(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if n_cores == 0 {
            return Err(OrchestratorError::Configuration(
                "n_cores must be at least 1".into(),
            ));
        }
        let required = n_cores.checked_mul(max_concurrency).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "n_cores ({n_cores}) * max_concurrency ({max_concurrency}) overflows"
            ))
        })?;
        if required > host_cores {
            return Err(OrchestratorError::Configuration(format!(
                "n_cores ({n_cores}) * max_concurrency ({max_concurrency}) = {required} \
                 exceeds the {host_cores} cores available on this host"
            )));
        }

        let available: VecDeque<_> = CoreAllocation::partition(max_concurrency, n_cores).into();
        tracing::info!(
            max_concurrency,
            n_cores,
            host_cores,
            "resource pool initialised"
        );

        Ok(Self {
            max_concurrency,
            n_cores,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            state: Arc::new(Mutex::new(PoolState {
                available,
                held: Vec::with_capacity(max_concurrency),
                peak_held: 0,
                acquired: 0,
                released: 0,
            })),
        })
    }

    /// Number of allocations in the pool.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.max_concurrency
    }

    /// Cores per allocation.
    #[must_use]
    pub const fn n_cores(&self) -> usize {
        self.n_cores
    }

    /// Every allocation of the pool, in slot order, whether held or not.
    #[must_use]
    pub fn partition(&self) -> Vec<CoreAllocation> {
        CoreAllocation::partition(self.max_concurrency, self.n_cores)
    }

    /// Take a free allocation, waiting until one is released if necessary.
    ///
    /// Waiters are admitted in the order they started waiting.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Infrastructure`] if the registry is found
    /// inconsistent.
    pub async fn acquire(&self) -> Result<CoreLease, OrchestratorError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::Infrastructure("resource pool closed".into()))?;
        self.lease(permit)
    }

    /// Take a free allocation if one is available right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<CoreLease> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        self.lease(permit).ok()
    }

    /// Return a leased allocation to the pool.
    ///
    /// Equivalent to dropping the lease.
    pub fn release(&self, lease: CoreLease) {
        drop(lease);
    }

    /// Current utilisation counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.max_concurrency,
            n_cores: self.n_cores,
            available: state.available.len(),
            held: state.held.len(),
            peak_held: state.peak_held,
            acquired: state.acquired,
            released: state.released,
        }
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> Result<CoreLease, OrchestratorError> {
        let allocation = self.state.lock().checkout()?;
        tracing::debug!(cores = %allocation, "acquired core allocation");
        Ok(CoreLease {
            allocation,
            state: Arc::clone(&self.state),
            _permit: permit,
        })
    }
}
