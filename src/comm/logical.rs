//! Registry view of one version: known locations and copies in flight

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{DataLocation, DataOperation};

/// A copy currently producing a new location for the value
#[derive(Clone)]
pub struct CopyInProgress {
    pub target: DataLocation,
    pub operation: Arc<DataOperation>,
}

/// Known physical locations of one version plus its in-flight copies
pub struct LogicalData {
    name: String,
    aliases: BTreeSet<String>,
    locations: BTreeSet<DataLocation>,
    in_progress: Vec<CopyInProgress>,
}

impl LogicalData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: BTreeSet::new(),
            locations: BTreeSet::new(),
            in_progress: Vec::new(),
        }
    }

    /// Renaming key this entry is registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &BTreeSet<String> {
        &self.aliases
    }

    pub fn add_alias(&mut self, alias: impl Into<String>) -> bool {
        self.aliases.insert(alias.into())
    }

    pub fn remove_alias(&mut self, alias: &str) -> bool {
        self.aliases.remove(alias)
    }

    pub fn locations(&self) -> &BTreeSet<DataLocation> {
        &self.locations
    }

    pub fn add_location(&mut self, location: DataLocation) -> bool {
        self.locations.insert(location)
    }

    /// Hosts holding the value
    pub fn hosts(&self) -> BTreeSet<String> {
        self.locations.iter().map(|l| l.host.clone()).collect()
    }

    pub fn is_on_host(&self, host: &str) -> bool {
        self.locations.iter().any(|l| l.host == host)
    }

    /// The value is already available on the target's host
    pub fn already_available(&self, target: &DataLocation) -> Option<&DataLocation> {
        self.locations.iter().find(|l| l.same_host(target))
    }

    /// Copy already producing the value on the target's host
    pub fn already_copying(&self, target: &DataLocation) -> Option<Arc<DataOperation>> {
        self.in_progress
            .iter()
            .find(|c| c.target.same_host(target))
            .map(|c| c.operation.clone())
    }

    pub fn start_copy(&mut self, operation: Arc<DataOperation>, target: DataLocation) {
        self.in_progress.push(CopyInProgress { target, operation });
    }

    /// Remove a finished copy from the in-flight table
    pub fn finished_copy(&mut self, operation_id: &str) -> Option<CopyInProgress> {
        let index = self
            .in_progress
            .iter()
            .position(|c| c.operation.id() == operation_id)?;
        Some(self.in_progress.remove(index))
    }

    pub fn copies_in_progress(&self) -> &[CopyInProgress] {
        &self.in_progress
    }

    /// Forget every location on `host`; returns what was removed
    pub fn remove_host(&mut self, host: &str) -> Vec<DataLocation> {
        let removed: Vec<DataLocation> = self
            .locations
            .iter()
            .filter(|l| l.host == host)
            .cloned()
            .collect();
        for location in &removed {
            self.locations.remove(location);
        }
        removed
    }
}
