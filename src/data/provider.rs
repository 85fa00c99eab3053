//! Data info provider: the name → ledger map shared by the scheduler
//!
//! Each datum sits behind its own lock, so accesses on unrelated data never
//! contend. The name map is only write-locked when a datum is created or
//! deleted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::ids::{DataId, RuntimeIds};

use super::{AccessMode, DataAccessId, DataInfo, DataInstanceId};

/// Version ledger for every datum of one runtime
pub struct DataInfoProvider {
    ids: Arc<RuntimeIds>,
    timestamp: i64,
    names: RwLock<HashMap<String, DataId>>,
    infos: RwLock<HashMap<DataId, Arc<Mutex<DataInfo>>>>,
}

impl DataInfoProvider {
    /// Create a provider stamping renamings with the current time
    pub fn new(ids: Arc<RuntimeIds>) -> Self {
        Self::with_timestamp(ids, Utc::now().timestamp_millis())
    }

    /// Create a provider with a fixed renaming timestamp
    pub fn with_timestamp(ids: Arc<RuntimeIds>, timestamp: i64) -> Self {
        Self {
            ids,
            timestamp,
            names: RwLock::new(HashMap::new()),
            infos: RwLock::new(HashMap::new()),
        }
    }

    fn info(&self, data_id: DataId) -> Result<Arc<Mutex<DataInfo>>> {
        self.infos
            .read()
            .get(&data_id)
            .cloned()
            .ok_or_else(|| Error::data_not_found(format!("data id {}", data_id)))
    }

    fn info_by_name(&self, name: &str) -> Option<Arc<Mutex<DataInfo>>> {
        let data_id = *self.names.read().get(name)?;
        self.infos.read().get(&data_id).cloned()
    }

    fn get_or_create(&self, name: &str) -> Arc<Mutex<DataInfo>> {
        if let Some(info) = self.info_by_name(name) {
            return info;
        }

        let mut names = self.names.write();
        if let Some(data_id) = names.get(name) {
            if let Some(info) = self.infos.read().get(data_id) {
                return info.clone();
            }
        }

        let data_id = self.ids.data.next_id();
        let info = Arc::new(Mutex::new(DataInfo::new(data_id, name, self.timestamp)));
        names.insert(name.to_string(), data_id);
        self.infos.write().insert(data_id, info.clone());
        debug!(data_id, name, "Data registered");
        info
    }

    /// Drop a deleted, fully evicted datum from the ledger
    fn forget_if_gone(&self, info: &DataInfo) {
        if info.is_deleted() && info.is_empty() {
            self.infos.write().remove(&info.data_id());
            trace!(data_id = info.data_id(), "Data left the ledger");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Access lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Register one access to `name`, creating the datum on first reference
    ///
    /// Returns the descriptor and renamings evicted as a side effect.
    pub fn register_access(&self, name: &str, mode: AccessMode) -> Result<(DataAccessId, Vec<String>)> {
        let info = self.get_or_create(name);
        let mut info = info.lock();
        let (access, evicted) = DataAccessId::register(&mut info, mode)?;
        trace!(
            data_id = info.data_id(),
            mode = ?mode,
            version = info.current_version_id(),
            "Access registered"
        );
        Ok((access, evicted))
    }

    /// The task holding `access` finished; release its counters
    pub fn data_has_been_accessed(&self, access: &DataAccessId) -> Result<Vec<String>> {
        let info = self.info(access.data_id())?;
        let mut info = info.lock();
        let mut evicted = Vec::new();
        match access {
            DataAccessId::Read(a) => {
                evicted.extend(info.version_read(a.read.version_id)?);
            }
            DataAccessId::Write(a) => {
                evicted.extend(info.version_written(a.written.version_id)?);
            }
            DataAccessId::ReadWrite(a) => {
                evicted.extend(info.version_read(a.read.version_id)?);
                evicted.extend(info.version_written(a.written.version_id)?);
            }
        }
        self.forget_if_gone(&info);
        Ok(evicted)
    }

    /// The task holding `access` will never run; undo the access
    pub fn data_access_canceled(&self, access: &DataAccessId) -> Result<Vec<String>> {
        let info = self.info(access.data_id())?;
        let mut info = info.lock();
        let mut evicted = Vec::new();
        match access {
            DataAccessId::Read(a) => {
                evicted.extend(info.version_read(a.read.version_id)?);
            }
            DataAccessId::Write(a) => {
                evicted.extend(info.write_canceled(a.written.version_id)?);
            }
            DataAccessId::ReadWrite(a) => {
                evicted.extend(info.write_canceled(a.written.version_id)?);
                evicted.extend(info.version_read(a.read.version_id)?);
            }
        }
        self.forget_if_gone(&info);
        Ok(evicted)
    }

    // ─────────────────────────────────────────────────────────────
    // Deletion
    // ─────────────────────────────────────────────────────────────

    /// Delete a datum by name
    ///
    /// The name is released immediately, so a later access creates a new
    /// datum with a new id. Versions still in use leave once released.
    pub fn delete_data(&self, name: &str) -> Result<Vec<String>> {
        let data_id = self
            .names
            .write()
            .remove(name)
            .ok_or_else(|| Error::data_not_found(name))?;
        let info = self.info(data_id)?;
        let mut info = info.lock();
        let evicted = info.delete();
        debug!(data_id, name, evicted = evicted.len(), "Data deleted");
        self.forget_if_gone(&info);
        Ok(evicted)
    }

    /// Hold back evictions of `data_id` while an operation needs it
    pub fn block_deletions(&self, data_id: DataId) -> Result<()> {
        self.info(data_id)?.lock().block_deletions();
        Ok(())
    }

    /// Release one block; returns renamings evicted by the replay
    pub fn unblock_deletions(&self, data_id: DataId) -> Result<Vec<String>> {
        let info = self.info(data_id)?;
        let mut info = info.lock();
        let evicted = info.unblock_deletions();
        self.forget_if_gone(&info);
        Ok(evicted)
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    /// Data id currently bound to `name`
    pub fn data_id(&self, name: &str) -> Option<DataId> {
        self.names.read().get(name).copied()
    }

    /// Current version of `name`
    pub fn last_version(&self, name: &str) -> Option<DataInstanceId> {
        let info = self.info_by_name(name)?;
        let info = info.lock();
        info.current_version().map(|v| v.instance().clone())
    }

    /// Renaming of the current version of `name`
    pub fn last_renaming(&self, name: &str) -> Option<String> {
        self.last_version(name).map(|i| i.renaming().to_string())
    }

    /// Live version ids of a datum
    pub fn version_ids(&self, data_id: DataId) -> Option<Vec<u32>> {
        let info = self.infos.read().get(&data_id).cloned()?;
        let ids = info.lock().version_ids();
        Some(ids)
    }

    /// `(pending_readers, pending_writers)` of one version
    pub fn pending_accesses(&self, data_id: DataId, version_id: u32) -> Option<(u32, u32)> {
        let info = self.infos.read().get(&data_id).cloned()?;
        let info = info.lock();
        info.version(version_id)
            .map(|v| (v.pending_readers(), v.pending_writers()))
    }

    /// Number of data still in the ledger
    pub fn live_data_count(&self) -> usize {
        self.infos.read().len()
    }
}
