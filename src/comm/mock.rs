//! Mock transfer adaptor for testing
//!
//! Records every copy and delete, can be paused to hold copies in flight,
//! and can be told to fail.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Error, Result};

use super::{DataLocation, TransferAdaptor};

/// Configuration for mock transfer behavior
#[derive(Debug, Clone, Default)]
pub struct MockTransferConfig {
    /// Simulated latency per copy (ms)
    pub copy_latency_ms: u64,

    /// Whether copies fail
    pub fail_copies: bool,

    /// Whether deletes fail
    pub fail_deletes: bool,
}

/// In-process transfer adaptor that only records what it was asked to do
pub struct MockTransfer {
    config: RwLock<MockTransferConfig>,
    gate: watch::Sender<bool>,
    copies: RwLock<Vec<(String, DataLocation, DataLocation)>>,
    deletes: RwLock<Vec<DataLocation>>,
}

impl MockTransfer {
    /// Create a mock with default configuration
    pub fn new() -> Self {
        Self::with_config(MockTransferConfig::default())
    }

    /// Create a mock with custom configuration
    pub fn with_config(config: MockTransferConfig) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            config: RwLock::new(config),
            gate,
            copies: RwLock::new(Vec::new()),
            deletes: RwLock::new(Vec::new()),
        }
    }

    /// Hold every copy until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Let held and future copies proceed
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    pub fn set_fail_copies(&self, fail: bool) {
        self.config.write().fail_copies = fail;
    }

    /// Number of copies started
    pub fn copy_count(&self) -> usize {
        self.copies.read().len()
    }

    /// `(data, source, target)` of every copy started
    pub fn copies(&self) -> Vec<(String, DataLocation, DataLocation)> {
        self.copies.read().clone()
    }

    /// Locations deleted
    pub fn deletes(&self) -> Vec<DataLocation> {
        self.deletes.read().clone()
    }
}

impl Default for MockTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferAdaptor for MockTransfer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn copy(&self, data: &str, source: &DataLocation, target: &DataLocation) -> Result<DataLocation> {
        self.copies
            .write()
            .push((data.to_string(), source.clone(), target.clone()));

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(Error::Internal("mock transfer gate closed".into()));
        }

        let config = self.config.read().clone();
        if config.copy_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.copy_latency_ms)).await;
        }
        if config.fail_copies {
            return Err(Error::transfer_failed(data, target, "mock copy failure"));
        }
        Ok(target.clone())
    }

    async fn delete(&self, location: &DataLocation) -> Result<()> {
        if self.config.read().fail_deletes {
            return Err(Error::transfer_failed("", location, "mock delete failure"));
        }
        self.deletes.write().push(location.clone());
        Ok(())
    }
}
