//! Id generators owned by a runtime instance
//!
//! Every counter lives in a [`RuntimeIds`] value that is handed to the
//! components needing it, so two runtimes in one process never share ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Data id
pub type DataId = u64;

/// Allocatable action id, distinct from the application's task id
pub type ActionId = u64;

/// Job id, fresh for every submission attempt
pub type JobId = u64;

/// Monotonic id source starting at 1
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator whose first id is 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a generator whose first id is `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next id
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Peek at the id the next call will return
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// All id sources of one runtime
#[derive(Debug, Default)]
pub struct RuntimeIds {
    pub data: IdGenerator,
    pub action: IdGenerator,
    pub job: IdGenerator,
}

impl RuntimeIds {
    /// Fresh shared set of generators
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
