//! Execution profiles per (resource, implementation)

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Average assumed before anything was measured (ms)
pub const DEFAULT_EXECUTION_MS: u64 = 100;

/// Observed execution times of one implementation on one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    executions: u64,
    min_ms: u64,
    avg_ms: u64,
    max_ms: u64,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            executions: 0,
            min_ms: DEFAULT_EXECUTION_MS,
            avg_ms: DEFAULT_EXECUTION_MS,
            max_ms: DEFAULT_EXECUTION_MS,
        }
    }
}

impl Profile {
    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    pub fn average_ms(&self) -> u64 {
        self.avg_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Fold one measured execution in
    pub fn update(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        if self.executions == 0 {
            self.min_ms = ms;
            self.avg_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
            let total = self.avg_ms as u128 * self.executions as u128 + ms as u128;
            self.avg_ms = (total / (self.executions as u128 + 1)) as u64;
        }
        self.executions += 1;
    }

    /// Merge another profile, e.g. when aggregating across resources
    pub fn accumulate(&mut self, other: &Profile) {
        if other.executions == 0 {
            return;
        }
        if self.executions == 0 {
            *self = *other;
            return;
        }
        self.min_ms = self.min_ms.min(other.min_ms);
        self.max_ms = self.max_ms.max(other.max_ms);
        let total = self.avg_ms as u128 * self.executions as u128
            + other.avg_ms as u128 * other.executions as u128;
        let count = self.executions + other.executions;
        self.avg_ms = (total / count as u128) as u64;
        self.executions = count;
    }
}
