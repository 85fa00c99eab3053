//! Physical data locations

use std::fmt;

use serde::{Deserialize, Serialize};

/// A place where a value physically exists: a host plus a path on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataLocation {
    pub host: String,
    pub path: String,
}

impl DataLocation {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Location of `renaming` inside a host's working directory
    pub fn in_dir(host: impl Into<String>, dir: &str, renaming: &str) -> Self {
        let dir = dir.trim_end_matches('/');
        Self::new(host, format!("{}/{}", dir, renaming))
    }

    /// Same host, regardless of path
    pub fn same_host(&self, other: &DataLocation) -> bool {
        self.host == other.host
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}
