//! Per-datum version history
//!
//! A [`DataInfo`] owns every live [`DataVersion`] of one datum. Versions are
//! numbered from 1 and only grow; a version id handed out once is never
//! reused, even after the version is evicted or a write is cancelled.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::{Error, Result};
use crate::ids::DataId;

use super::{DataInstanceId, DataVersion};

/// Version ledger entry for one datum
#[derive(Debug)]
pub struct DataInfo {
    data_id: DataId,
    name: String,
    timestamp: i64,
    versions: BTreeMap<u32, DataVersion>,
    current: u32,
    last_allocated: u32,
    /// Version 1 has not been touched by any access yet
    fresh: bool,
    deletion_blocks: u32,
    pending_deletions: Vec<u32>,
    deleted: bool,
}

impl DataInfo {
    /// Create the datum with its initial version 1
    pub fn new(data_id: DataId, name: impl Into<String>, timestamp: i64) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(1, DataVersion::new(DataInstanceId::new(data_id, 1, timestamp)));
        Self {
            data_id,
            name: name.into(),
            timestamp,
            versions,
            current: 1,
            last_allocated: 1,
            fresh: true,
            deletion_blocks: 0,
            pending_deletions: Vec::new(),
            deleted: false,
        }
    }

    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_version_id(&self) -> u32 {
        self.current
    }

    pub fn current_version(&self) -> Option<&DataVersion> {
        self.versions.get(&self.current)
    }

    pub fn version(&self, version_id: u32) -> Option<&DataVersion> {
        self.versions.get(&version_id)
    }

    /// Live version ids, ascending
    pub fn version_ids(&self) -> Vec<u32> {
        self.versions.keys().copied().collect()
    }

    pub fn deletion_blocks(&self) -> u32 {
        self.deletion_blocks
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// No version left; the datum can leave the ledger
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn version_mut(&mut self, version_id: u32) -> Result<&mut DataVersion> {
        let data_id = self.data_id;
        self.versions
            .get_mut(&version_id)
            .ok_or(Error::VersionNotFound {
                data_id,
                version_id,
            })
    }

    // ─────────────────────────────────────────────────────────────
    // Access registration
    // ─────────────────────────────────────────────────────────────

    /// Register a pending read on the current version
    ///
    /// Returns the instance read and its reader count including this one.
    pub fn will_be_read(&mut self) -> Result<(DataInstanceId, u32)> {
        self.fresh = false;
        let current = self.current;
        let version = self.version_mut(current)?;
        version.will_be_read();
        Ok((version.instance().clone(), version.pending_readers()))
    }

    /// Register a pending write, allocating the next version
    ///
    /// The very first access to a datum that is a write lands on version 1.
    /// Otherwise the previous current version is flagged as superseded and
    /// leaves the ledger once its pending accesses drain. Returns the
    /// written instance plus any renamings evicted on the spot.
    pub fn will_be_written(&mut self) -> Result<(DataInstanceId, Vec<String>)> {
        if self.fresh {
            self.fresh = false;
            let version = self.version_mut(1)?;
            version.will_be_written();
            return Ok((version.instance().clone(), Vec::new()));
        }

        let previous = self.current;
        self.last_allocated += 1;
        let version_id = self.last_allocated;
        let instance = DataInstanceId::new(self.data_id, version_id, self.timestamp);
        let mut version = DataVersion::new(instance.clone());
        version.will_be_written();
        self.versions.insert(version_id, version);
        self.current = version_id;

        let mut evicted = Vec::new();
        if let Some(old) = self.versions.get_mut(&previous) {
            old.mark_to_delete();
        }
        evicted.extend(self.try_evict(previous));

        trace!(data_id = self.data_id, version_id, "New version allocated");
        Ok((instance, evicted))
    }

    // ─────────────────────────────────────────────────────────────
    // Access release
    // ─────────────────────────────────────────────────────────────

    /// Release one pending read; returns the renaming if the version left
    pub fn version_read(&mut self, version_id: u32) -> Result<Option<String>> {
        let data_id = self.data_id;
        if !self.version_mut(version_id)?.version_read() {
            return Err(Error::AccessMismatch {
                data_id,
                message: format!("no pending reader on version {}", version_id),
            });
        }
        Ok(self.try_evict(version_id))
    }

    /// Release one pending write; returns the renaming if the version left
    pub fn version_written(&mut self, version_id: u32) -> Result<Option<String>> {
        let data_id = self.data_id;
        if !self.version_mut(version_id)?.version_written() {
            return Err(Error::AccessMismatch {
                data_id,
                message: format!("no pending writer on version {}", version_id),
            });
        }
        Ok(self.try_evict(version_id))
    }

    /// Undo a registered write whose task never ran
    ///
    /// The version will never hold a value, so it is discarded. If it was
    /// the current version and its predecessor is still live, the predecessor
    /// becomes current again.
    pub fn write_canceled(&mut self, version_id: u32) -> Result<Vec<String>> {
        let data_id = self.data_id;
        if !self.version_mut(version_id)?.version_written() {
            return Err(Error::AccessMismatch {
                data_id,
                message: format!("no pending writer on version {}", version_id),
            });
        }

        if version_id != self.current {
            if let Some(v) = self.versions.get_mut(&version_id) {
                v.mark_to_delete();
            }
            return Ok(self.try_evict(version_id).into_iter().collect());
        }

        let previous = self.versions.range(..version_id).next_back().map(|(id, _)| *id);
        match previous {
            Some(prev) if !self.deleted => {
                self.current = prev;
                if let Some(v) = self.versions.get_mut(&prev) {
                    // Un-supersede; a pending delete still applies later
                    if !self.pending_deletions.contains(&prev) {
                        v.clear_to_delete();
                    }
                }
                if let Some(v) = self.versions.get_mut(&version_id) {
                    v.mark_to_delete();
                }
                Ok(self.try_evict(version_id).into_iter().collect())
            }
            _ => Ok(self.try_evict(version_id).into_iter().collect()),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Deletion
    // ─────────────────────────────────────────────────────────────

    /// Request deletion of every live version
    ///
    /// While deletions are blocked the request is queued and nothing is
    /// flagged; [`unblock_deletions`](Self::unblock_deletions) replays it.
    pub fn delete(&mut self) -> Vec<String> {
        self.deleted = true;
        if self.deletion_blocks > 0 {
            let ids: Vec<u32> = self.versions.keys().copied().collect();
            self.pending_deletions.extend(ids);
            trace!(
                data_id = self.data_id,
                blocks = self.deletion_blocks,
                "Deletion deferred"
            );
            return Vec::new();
        }

        for version in self.versions.values_mut() {
            version.mark_to_delete();
        }
        self.sweep()
    }

    pub fn block_deletions(&mut self) {
        self.deletion_blocks += 1;
    }

    /// Drop one block; at zero, replay queued deletions and evict
    pub fn unblock_deletions(&mut self) -> Vec<String> {
        if self.deletion_blocks == 0 {
            return Vec::new();
        }
        self.deletion_blocks -= 1;
        if self.deletion_blocks > 0 {
            return Vec::new();
        }

        for version_id in std::mem::take(&mut self.pending_deletions) {
            if let Some(v) = self.versions.get_mut(&version_id) {
                v.mark_to_delete();
            }
        }
        self.sweep()
    }

    fn try_evict(&mut self, version_id: u32) -> Option<String> {
        if self.deletion_blocks > 0 {
            return None;
        }
        let removable = self
            .versions
            .get(&version_id)
            .map(|v| v.is_removable())
            .unwrap_or(false);
        if !removable {
            return None;
        }
        self.versions
            .remove(&version_id)
            .map(|v| v.instance().renaming().to_string())
    }

    fn sweep(&mut self) -> Vec<String> {
        let removable: Vec<u32> = self
            .versions
            .iter()
            .filter(|(_, v)| v.is_removable())
            .map(|(id, _)| *id)
            .collect();
        removable
            .into_iter()
            .filter_map(|id| self.try_evict(id))
            .collect()
    }
}
