//! Access descriptors issued at task submission time

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::DataId;

use super::{DataInfo, DataInstanceId};

/// How a task parameter touches its datum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn reads(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn writes(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// Read of the version current at submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAccess {
    pub read: DataInstanceId,
    pub preserve_source: bool,
}

/// Write of a brand-new version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAccess {
    pub written: DataInstanceId,
}

/// Read of version `v` producing version `v + 1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteAccess {
    pub read: DataInstanceId,
    pub written: DataInstanceId,
    pub preserve_source: bool,
}

/// Immutable record of the version(s) one task parameter touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAccessId {
    Read(ReadAccess),
    Write(WriteAccess),
    ReadWrite(ReadWriteAccess),
}

impl DataAccessId {
    /// Register the access on the ledger entry and build its descriptor
    ///
    /// Counters are bumped while the caller holds the entry, so the
    /// descriptor and the counters can never be observed out of step.
    /// Also returns renamings evicted because a write superseded them.
    pub(crate) fn register(info: &mut DataInfo, mode: AccessMode) -> Result<(Self, Vec<String>)> {
        match mode {
            AccessMode::Read => {
                let (read, readers) = info.will_be_read()?;
                // Version 1 is the original value and is never erased implicitly
                let preserve_source = readers > 1 || read.version_id == 1;
                Ok((DataAccessId::Read(ReadAccess { read, preserve_source }), Vec::new()))
            }
            AccessMode::Write => {
                let (written, evicted) = info.will_be_written()?;
                Ok((DataAccessId::Write(WriteAccess { written }), evicted))
            }
            AccessMode::ReadWrite => {
                let (read, readers) = info.will_be_read()?;
                let (written, evicted) = info.will_be_written()?;
                Ok((
                    DataAccessId::ReadWrite(ReadWriteAccess {
                        read,
                        written,
                        preserve_source: readers > 1,
                    }),
                    evicted,
                ))
            }
        }
    }

    pub fn mode(&self) -> AccessMode {
        match self {
            DataAccessId::Read(_) => AccessMode::Read,
            DataAccessId::Write(_) => AccessMode::Write,
            DataAccessId::ReadWrite(_) => AccessMode::ReadWrite,
        }
    }

    pub fn data_id(&self) -> DataId {
        match self {
            DataAccessId::Read(a) => a.read.data_id,
            DataAccessId::Write(a) => a.written.data_id,
            DataAccessId::ReadWrite(a) => a.read.data_id,
        }
    }

    /// Version read, if any
    pub fn read_instance(&self) -> Option<&DataInstanceId> {
        match self {
            DataAccessId::Read(a) => Some(&a.read),
            DataAccessId::Write(_) => None,
            DataAccessId::ReadWrite(a) => Some(&a.read),
        }
    }

    /// Version written, if any
    pub fn written_instance(&self) -> Option<&DataInstanceId> {
        match self {
            DataAccessId::Read(_) => None,
            DataAccessId::Write(a) => Some(&a.written),
            DataAccessId::ReadWrite(a) => Some(&a.written),
        }
    }

    /// Whether the read source must survive the task
    pub fn preserve_source(&self) -> bool {
        match self {
            DataAccessId::Read(a) => a.preserve_source,
            DataAccessId::Write(_) => false,
            DataAccessId::ReadWrite(a) => a.preserve_source,
        }
    }
}
