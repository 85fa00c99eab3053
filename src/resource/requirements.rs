//! Resource requirements and capacity arithmetic

use std::fmt;

use serde::{Deserialize, Serialize};

/// What an implementation needs, or what a resource offers
///
/// Computing units and memory are consumable. The node count is a shape
/// constraint: a multi-node job needs a resource spanning that many nodes,
/// but running it does not use the nodes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    /// Cores (or other computing units)
    pub computing_units: u32,

    /// Memory (MB)
    pub memory_mb: u64,

    /// Nodes spanned
    pub node_count: u32,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            computing_units: 1,
            memory_mb: 0,
            node_count: 1,
        }
    }
}

impl ResourceRequirements {
    pub fn new(computing_units: u32) -> Self {
        Self {
            computing_units,
            ..Default::default()
        }
    }

    pub fn with_memory(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_nodes(mut self, node_count: u32) -> Self {
        self.node_count = node_count;
        self
    }

    /// Nothing is requested
    pub fn is_empty(&self) -> bool {
        self.computing_units == 0 && self.memory_mb == 0
    }

    /// `self` fits inside `available`
    pub fn fits_in(&self, available: &ResourceRequirements) -> bool {
        self.computing_units <= available.computing_units
            && self.memory_mb <= available.memory_mb
            && self.node_count <= available.node_count.max(1)
    }

    /// Take `other` out of the consumable fields
    pub fn reduce(&mut self, other: &ResourceRequirements) {
        self.computing_units = self.computing_units.saturating_sub(other.computing_units);
        self.memory_mb = self.memory_mb.saturating_sub(other.memory_mb);
    }

    /// Give `other` back to the consumable fields
    pub fn increase(&mut self, other: &ResourceRequirements) {
        self.computing_units = self.computing_units.saturating_add(other.computing_units);
        self.memory_mb = self.memory_mb.saturating_add(other.memory_mb);
    }

    /// Size of a job: computing units across all of its nodes
    pub fn weight(&self) -> i64 {
        self.computing_units as i64 * self.node_count.max(1) as i64
    }
}

impl fmt::Display for ResourceRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}cu/{}MB/{}n",
            self.computing_units, self.memory_mb, self.node_count
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Capacity
// ─────────────────────────────────────────────────────────────────

/// Total and free capacity of one resource
#[derive(Debug, Clone)]
pub struct Capacity {
    total: ResourceRequirements,
    free: ResourceRequirements,
}

impl Capacity {
    pub fn new(total: ResourceRequirements) -> Self {
        Self { total, free: total }
    }

    pub fn total(&self) -> ResourceRequirements {
        self.total
    }

    pub fn free(&self) -> ResourceRequirements {
        self.free
    }

    /// Reserve `req` if it fits in the free capacity
    pub fn reserve(&mut self, req: &ResourceRequirements) -> bool {
        if !req.fits_in(&self.free) {
            return false;
        }
        self.free.reduce(req);
        true
    }

    /// Return a reservation, never exceeding the total
    pub fn release(&mut self, req: &ResourceRequirements) {
        self.free.increase(req);
        self.free.computing_units = self.free.computing_units.min(self.total.computing_units);
        self.free.memory_mb = self.free.memory_mb.min(self.total.memory_mb);
    }

    /// Change the total, keeping what is reserved reserved
    pub fn resize(&mut self, total: ResourceRequirements) {
        let mut in_use = self.total;
        in_use.reduce(&self.free);

        self.total = total;
        self.free = total;
        self.free.reduce(&in_use);
    }

    pub fn is_idle(&self) -> bool {
        self.free.computing_units == self.total.computing_units
            && self.free.memory_mb == self.total.memory_mb
    }
}
