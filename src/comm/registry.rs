//! Logical data registry and copy deduplication
//!
//! Maps every version's renaming key to its known physical locations and to
//! the copies currently producing new ones. [`LogicalDataRegistry::obtain`]
//! guarantees at most one concurrent physical copy per (version, target
//! host) pair: later requests for the same target attach to the running
//! copy instead of starting another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::TransferSettings;
use crate::data::DataInstanceId;
use crate::error::{Error, Result};

use super::{
    DataLocation, DataOperation, DataOperationListener, LogicalData, OperationKind,
    OperationResult, OperationStatus, TransferAdaptor,
};

/// What [`LogicalDataRegistry::obtain`] did with a request
#[derive(Debug, Clone)]
pub struct Obtained {
    /// Status right after the call
    pub status: OperationStatus,
    /// The request joined a copy someone else started
    pub deduplicated: bool,
    /// Operation the listener was attached to
    pub operation: Arc<DataOperation>,
}

type Entry = Arc<Mutex<LogicalData>>;

/// Known locations and in-flight copies of every version
pub struct LogicalDataRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    aliases: RwLock<HashMap<String, String>>,
    adaptor: Arc<dyn TransferAdaptor>,
    copy_slots: Arc<Semaphore>,
    copy_timeout: Option<Duration>,
    self_ref: Weak<LogicalDataRegistry>,
}

impl LogicalDataRegistry {
    pub fn new(adaptor: Arc<dyn TransferAdaptor>, settings: &TransferSettings) -> Arc<Self> {
        let slots = settings.effective_concurrency();
        info!(
            adaptor = adaptor.name(),
            max_concurrent_copies = slots,
            "Logical data registry created"
        );
        Arc::new_cyclic(|self_ref| Self {
            entries: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            adaptor,
            copy_slots: Arc::new(Semaphore::new(slots)),
            copy_timeout: settings.copy_timeout(),
            self_ref: self_ref.clone(),
        })
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        if let Some(entry) = self.entries.read().get(name) {
            return Some(entry.clone());
        }
        let renaming = self.aliases.read().get(name).cloned()?;
        self.entries.read().get(&renaming).cloned()
    }

    fn entry_or_create(&self, renaming: &str) -> Entry {
        if let Some(entry) = self.entry(renaming) {
            return entry;
        }
        self.entries
            .write()
            .entry(renaming.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LogicalData::new(renaming))))
            .clone()
    }

    // ─────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────

    /// Ensure an entry exists for `renaming`
    pub fn register(&self, renaming: &str) {
        self.entry_or_create(renaming);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Record that the value of `renaming` exists at `location`
    pub fn add_location(&self, renaming: &str, location: DataLocation) {
        let entry = self.entry_or_create(renaming);
        if entry.lock().add_location(location.clone()) {
            debug!(data = renaming, location = %location, "Location added");
        }
    }

    /// Register an application-visible alias (e.g. a file name)
    pub fn add_alias(&self, renaming: &str, alias: &str) {
        let entry = self.entry_or_create(renaming);
        entry.lock().add_alias(alias);
        self.aliases
            .write()
            .insert(alias.to_string(), renaming.to_string());
    }

    /// Renaming an alias points to
    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases.read().get(alias).cloned()
    }

    pub fn locations(&self, name: &str) -> Vec<DataLocation> {
        self.entry(name)
            .map(|e| e.lock().locations().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn hosts(&self, name: &str) -> HashSet<String> {
        self.entry(name)
            .map(|e| e.lock().hosts().into_iter().collect())
            .unwrap_or_default()
    }

    /// Renamings with at least one location on `host`
    pub fn data_on_host(&self, host: &str) -> HashSet<String> {
        let entries: Vec<Entry> = self.entries.read().values().cloned().collect();
        entries
            .iter()
            .filter_map(|e| {
                let ld = e.lock();
                ld.is_on_host(host).then(|| ld.name().to_string())
            })
            .collect()
    }

    /// Copies currently running or waiting for a source
    pub fn copies_in_progress(&self) -> Vec<Arc<DataOperation>> {
        let entries: Vec<Entry> = self.entries.read().values().cloned().collect();
        entries
            .iter()
            .flat_map(|e| {
                e.lock()
                    .copies_in_progress()
                    .iter()
                    .map(|c| c.operation.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// A host left the pool; returns renamings that lost their last location
    pub fn remove_host(&self, host: &str) -> Vec<String> {
        let entries: Vec<Entry> = self.entries.read().values().cloned().collect();
        let mut lost = Vec::new();
        for entry in entries {
            let mut ld = entry.lock();
            if !ld.remove_host(host).is_empty() && ld.locations().is_empty() {
                lost.push(ld.name().to_string());
            }
        }
        if !lost.is_empty() {
            warn!(host, lost = lost.len(), "Values lost with host");
        }
        lost
    }

    // ─────────────────────────────────────────────────────────────
    // Obtain
    // ─────────────────────────────────────────────────────────────

    /// Make `renaming` available at `target`, telling `listener` how it ends
    ///
    /// - value already on the target host: settles synchronously, `OP_OK`
    /// - copy to that host already in flight: attaches, `OP_IN_PROGRESS`
    /// - no location but a copy elsewhere in flight: queues, `OP_WAITING_SOURCES`
    /// - otherwise a new copy starts, `OP_IN_PROGRESS`
    ///
    /// When `target_data` is given, the resulting location is also recorded
    /// for that renaming. Unknown data or no possible source settles the
    /// listener with `OP_PREPARATION_FAILED`.
    pub fn obtain(
        &self,
        renaming: &str,
        target: DataLocation,
        target_data: Option<&str>,
        listener: Arc<dyn DataOperationListener>,
    ) -> Result<Obtained> {
        let kind = OperationKind::Copy {
            data: renaming.to_string(),
            target: target.clone(),
        };

        let entry = match self.entry(renaming) {
            Some(entry) => entry,
            None => {
                let op = DataOperation::settled(
                    kind,
                    Err(Arc::new(Error::transfer_preparation(renaming, "unknown data"))),
                );
                op.add_listener(listener);
                return Ok(Obtained {
                    status: OperationStatus::PreparationFailed,
                    deduplicated: false,
                    operation: op,
                });
            }
        };

        enum Plan {
            Present(DataLocation),
            Attach(Arc<DataOperation>),
            Wait(Arc<DataOperation>, Arc<DataOperation>),
            Start(Arc<DataOperation>, DataLocation),
            NoSource,
        }

        // One critical section decides between all outcomes
        let plan = {
            let mut ld = entry.lock();
            if let Some(existing) = ld.already_available(&target) {
                Plan::Present(existing.clone())
            } else if let Some(op) = ld.already_copying(&target) {
                Plan::Attach(op)
            } else if let Some(source) = ld.locations().iter().next().cloned() {
                let op = DataOperation::new(kind.clone());
                ld.start_copy(op.clone(), target.clone());
                Plan::Start(op, source)
            } else if let Some(upstream) = ld.copies_in_progress().first().map(|c| c.operation.clone()) {
                let op = DataOperation::new(kind.clone());
                op.mark_waiting_sources(true);
                ld.start_copy(op.clone(), target.clone());
                Plan::Wait(op, upstream)
            } else {
                Plan::NoSource
            }
        };

        let target_data = target_data.map(str::to_string);
        match plan {
            Plan::Present(location) => {
                if let Some(ref other) = target_data {
                    self.add_location(other, location.clone());
                }
                let op = DataOperation::settled(kind, Ok(Some(location)));
                op.add_listener(listener);
                Ok(Obtained {
                    status: OperationStatus::Ok,
                    deduplicated: false,
                    operation: op,
                })
            }
            Plan::Attach(op) => {
                debug!(data = renaming, target = %target, operation = op.id(), "Attached to copy in flight");
                op.add_listener(listener);
                Ok(Obtained {
                    status: op.status(),
                    deduplicated: true,
                    operation: op,
                })
            }
            Plan::Wait(op, upstream) => {
                debug!(data = renaming, target = %target, upstream = upstream.id(), "Copy waiting for sources");
                op.add_listener(listener);
                let status = op.status();
                upstream.add_listener(Arc::new(SourceWaiter {
                    registry: self.self_ref.clone(),
                    entry,
                    operation: op.clone(),
                    target,
                    target_data,
                }));
                Ok(Obtained {
                    status,
                    deduplicated: false,
                    operation: op,
                })
            }
            Plan::Start(op, source) => {
                op.add_listener(listener);
                self.launch_copy(entry, op.clone(), source, target, target_data);
                Ok(Obtained {
                    status: op.status(),
                    deduplicated: false,
                    operation: op,
                })
            }
            Plan::NoSource => {
                let op = DataOperation::settled(
                    kind,
                    Err(Arc::new(Error::transfer_preparation(renaming, "no source location"))),
                );
                op.add_listener(listener);
                Ok(Obtained {
                    status: OperationStatus::PreparationFailed,
                    deduplicated: false,
                    operation: op,
                })
            }
        }
    }

    fn launch_copy(
        &self,
        entry: Entry,
        op: Arc<DataOperation>,
        source: DataLocation,
        target: DataLocation,
        target_data: Option<String>,
    ) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let err = Error::Internal("data copies need a tokio runtime".into());
                self.finish_copy(&entry, &op, Err(Arc::new(err)), target_data.as_deref());
                return;
            }
        };

        let registry = self.self_ref.clone();
        let adaptor = self.adaptor.clone();
        let slots = self.copy_slots.clone();
        let copy_timeout = self.copy_timeout;
        let data = op.data().to_string();

        debug!(data = %data, source = %source, target = %target, operation = op.id(), "Copy started");
        handle.spawn(async move {
            let _permit = slots.acquire_owned().await.ok();
            let copy = adaptor.copy(&data, &source, &target);
            let result = match copy_timeout {
                Some(limit) => match tokio::time::timeout(limit, copy).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::TransferTimeout {
                        data: data.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => copy.await,
            };

            let result: OperationResult = result.map(Some).map_err(Arc::new);
            match registry.upgrade() {
                Some(registry) => {
                    registry.finish_copy(&entry, &op, result, target_data.as_deref())
                }
                None => {
                    entry.lock().finished_copy(op.id());
                    op.end(result);
                }
            }
        });
    }

    fn finish_copy(
        &self,
        entry: &Entry,
        op: &Arc<DataOperation>,
        result: OperationResult,
        target_data: Option<&str>,
    ) {
        let live = {
            let mut ld = entry.lock();
            ld.finished_copy(op.id());
            if let Ok(Some(ref location)) = result {
                ld.add_location(location.clone());
            }
            self.entries
                .read()
                .get(ld.name())
                .is_some_and(|current| Arc::ptr_eq(current, entry))
        };

        match &result {
            Ok(Some(location)) => {
                if let Some(other) = target_data {
                    self.add_location(other, location.clone());
                } else if !live {
                    // The version was removed while this copy was running
                    debug!(data = op.data(), location = %location, "Copy of removed data, deleting");
                    if let Ok(handle) = Handle::try_current() {
                        self.spawn_delete(&handle, op.data(), location.clone());
                    }
                }
                debug!(data = op.data(), location = %location, operation = op.id(), "Copy finished");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(data = op.data(), operation = op.id(), error = %e, "Copy failed");
            }
        }
        op.end(result);
    }

    // ─────────────────────────────────────────────────────────────
    // Removal
    // ─────────────────────────────────────────────────────────────

    /// Drop the entry for `renaming`
    ///
    /// With `delete_physical`, every known location is removed through the
    /// adaptor and the delete operations are returned. The locations of a
    /// version 1, the original value, are never physically deleted.
    pub fn remove(&self, renaming: &str, delete_physical: bool) -> Vec<Arc<DataOperation>> {
        let entry = match self.entries.write().remove(renaming) {
            Some(entry) => entry,
            None => return Vec::new(),
        };

        let (aliases, locations) = {
            let ld = entry.lock();
            (
                ld.aliases().iter().cloned().collect::<Vec<_>>(),
                ld.locations().iter().cloned().collect::<Vec<_>>(),
            )
        };
        {
            let mut alias_map = self.aliases.write();
            for alias in &aliases {
                // The alias may already point at a newer entry
                if alias_map.get(alias).map(String::as_str) == Some(renaming) {
                    alias_map.remove(alias);
                }
            }
        }

        let original = matches!(DataInstanceId::parse_renaming(renaming), Some((_, 1)));
        if !delete_physical || original {
            debug!(data = renaming, original, "Logical data removed");
            return Vec::new();
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(data = renaming, "No tokio runtime, physical copies left in place");
                return Vec::new();
            }
        };

        locations
            .into_iter()
            .map(|location| self.spawn_delete(&handle, renaming, location))
            .collect()
    }

    fn spawn_delete(&self, handle: &Handle, renaming: &str, location: DataLocation) -> Arc<DataOperation> {
        let op = DataOperation::new(OperationKind::Delete {
            data: renaming.to_string(),
            location: location.clone(),
        });
        let adaptor = self.adaptor.clone();
        let task_op = op.clone();
        handle.spawn(async move {
            let result = adaptor.delete(&location).await;
            task_op.end(result.map(|_| None).map_err(Arc::new));
        });
        op
    }
}

/// Starts a queued copy once the copy producing its source settles
struct SourceWaiter {
    registry: Weak<LogicalDataRegistry>,
    entry: Entry,
    operation: Arc<DataOperation>,
    target: DataLocation,
    target_data: Option<String>,
}

impl DataOperationListener for SourceWaiter {
    fn notify_end(&self, upstream: &DataOperation) {
        let Some(registry) = self.registry.upgrade() else {
            self.operation.end(Err(Arc::new(Error::Internal("registry dropped".into()))));
            return;
        };
        self.operation.mark_waiting_sources(false);
        match upstream.result_location() {
            Some(source) => registry.launch_copy(
                self.entry.clone(),
                self.operation.clone(),
                source,
                self.target.clone(),
                self.target_data.clone(),
            ),
            None => registry.finish_copy(
                &self.entry,
                &self.operation,
                Err(Arc::new(Error::transfer_preparation(
                    self.operation.data(),
                    "source copy produced no location",
                ))),
                None,
            ),
        }
    }

    fn notify_failure(&self, upstream: &DataOperation, error: &Error) {
        let err = Error::transfer_failed(
            self.operation.data(),
            &self.target,
            format!("source copy {} failed: {}", upstream.id(), error),
        );
        match self.registry.upgrade() {
            Some(registry) => {
                registry.finish_copy(&self.entry, &self.operation, Err(Arc::new(err)), None)
            }
            None => {
                self.operation.end(Err(Arc::new(err)));
            }
        }
    }
}
