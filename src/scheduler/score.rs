//! Candidate ranking
//!
//! A [`Score`] is compared field by field, left to right, and greater is
//! better. Policies only decide how the fields are filled in.

use std::cmp::Ordering;
use std::fmt;

/// Ordered tuple ranking an (action, resource, implementation) candidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Score {
    pub action: i64,
    pub group: i64,
    pub resource: i64,
    pub waiting: i64,
    pub implementation: i64,
}

impl Score {
    pub fn new(action: i64, group: i64, resource: i64, waiting: i64, implementation: i64) -> Self {
        Self {
            action,
            group,
            resource,
            waiting,
            implementation,
        }
    }

    /// Copy with the resource field replaced
    pub fn with_resource(mut self, resource: i64) -> Self {
        self.resource = resource;
        self
    }

    /// Copy with the implementation field replaced
    pub fn with_implementation(mut self, implementation: i64) -> Self {
        self.implementation = implementation;
        self
    }

    /// Copy with the waiting field replaced
    pub fn with_waiting(mut self, waiting: i64) -> Self {
        self.waiting = waiting;
        self
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}, {}]",
            self.action, self.group, self.resource, self.waiting, self.implementation
        )
    }
}

/// Whether `a` is strictly better than `b`; a missing score loses to any score
pub fn is_better(a: Option<&Score>, b: Option<&Score>) -> bool {
    compare(a, b) == Ordering::Greater
}

/// Total order over optional scores with `None` lowest
pub fn compare(a: Option<&Score>, b: Option<&Score>) -> Ordering {
    // Option's derived order already puts None first
    a.cmp(&b)
}
