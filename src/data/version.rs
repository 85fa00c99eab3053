//! Data versions and their renaming keys

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::DataId;

/// Identifies one version of one datum
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataInstanceId {
    pub data_id: DataId,
    pub version_id: u32,
    renaming: String,
}

impl DataInstanceId {
    /// Build the instance id; the renaming is `d<data>v<version>_<timestamp>`
    pub fn new(data_id: DataId, version_id: u32, timestamp: i64) -> Self {
        Self {
            data_id,
            version_id,
            renaming: format!("d{}v{}_{}", data_id, version_id, timestamp),
        }
    }

    /// Cross-process key of this version
    pub fn renaming(&self) -> &str {
        &self.renaming
    }

    /// Recover `(data_id, version_id)` from a renaming key
    pub fn parse_renaming(renaming: &str) -> Option<(DataId, u32)> {
        let rest = renaming.strip_prefix('d')?;
        let (data, rest) = rest.split_once('v')?;
        let (version, timestamp) = rest.split_once('_')?;
        timestamp.parse::<i64>().ok()?;
        Some((data.parse().ok()?, version.parse().ok()?))
    }
}

impl fmt::Display for DataInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.renaming)
    }
}

/// One immutable instance of a datum plus its pending access counters
#[derive(Debug, Clone)]
pub struct DataVersion {
    instance: DataInstanceId,
    readers: u32,
    writers: u32,
    to_delete: bool,
}

impl DataVersion {
    pub fn new(instance: DataInstanceId) -> Self {
        Self {
            instance,
            readers: 0,
            writers: 0,
            to_delete: false,
        }
    }

    pub fn instance(&self) -> &DataInstanceId {
        &self.instance
    }

    pub fn version_id(&self) -> u32 {
        self.instance.version_id
    }

    pub fn pending_readers(&self) -> u32 {
        self.readers
    }

    pub fn pending_writers(&self) -> u32 {
        self.writers
    }

    pub fn is_to_delete(&self) -> bool {
        self.to_delete
    }

    pub(crate) fn will_be_read(&mut self) {
        self.readers += 1;
    }

    pub(crate) fn will_be_written(&mut self) {
        self.writers += 1;
    }

    /// Returns false if there was no pending read to release
    pub(crate) fn version_read(&mut self) -> bool {
        if self.readers == 0 {
            return false;
        }
        self.readers -= 1;
        true
    }

    /// Returns false if there was no pending write to release
    pub(crate) fn version_written(&mut self) -> bool {
        if self.writers == 0 {
            return false;
        }
        self.writers -= 1;
        true
    }

    pub(crate) fn mark_to_delete(&mut self) {
        self.to_delete = true;
    }

    pub(crate) fn clear_to_delete(&mut self) {
        self.to_delete = false;
    }

    /// Eligible for eviction from the ledger
    pub fn is_removable(&self) -> bool {
        self.to_delete && self.readers == 0 && self.writers == 0
    }
}
