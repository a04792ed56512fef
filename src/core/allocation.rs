//! CPU-core allocations handed out by the resource pool.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fixed, contiguous block of CPU-core indices owned by one slot of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoreAllocation {
    slot: usize,
    cores: Vec<usize>,
}

impl CoreAllocation {
    /// Split `[0, slots * cores_per_slot)` into `slots` contiguous blocks.
    ///
    /// Callers are expected to have checked that the product does not overflow.
    #[must_use]
    pub fn partition(slots: usize, cores_per_slot: usize) -> Vec<Self> {
        (0..slots)
            .map(|slot| Self {
                slot,
                cores: (slot * cores_per_slot..(slot + 1) * cores_per_slot).collect(),
            })
            .collect()
    }

    /// Slot number of this block within its pool.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Core indices, ascending.
    #[must_use]
    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    /// Number of cores in the block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Whether the block has no cores.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// Whether any core index is shared with `other`.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.cores.iter().any(|c| other.cores.contains(c))
    }

    /// Comma-separated cpuset string, e.g. `"4,5,6,7"`.
    #[must_use]
    pub fn cpuset(&self) -> String {
        self.cores
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for CoreAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cpuset())
    }
}
