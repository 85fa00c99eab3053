//! Contract of the adaptor that actually moves bytes between hosts

use async_trait::async_trait;

use crate::error::Result;

use super::DataLocation;

/// Wire-level mover used by the registry for physical copies and deletes
#[async_trait]
pub trait TransferAdaptor: Send + Sync {
    /// Adaptor name for logs
    fn name(&self) -> &'static str;

    /// Copy the value of `data` from `source` to `target`
    ///
    /// Returns the location the value ended up at, which may differ from
    /// the requested target (e.g. a canonicalised path).
    async fn copy(&self, data: &str, source: &DataLocation, target: &DataLocation) -> Result<DataLocation>;

    /// Remove one physical copy
    async fn delete(&self, location: &DataLocation) -> Result<()>;
}
