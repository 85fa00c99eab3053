//! Data movement layer
//!
//! - [`DataLocation`]: where a value physically lives
//! - [`DataOperation`]: a copy or delete, settled once, with listeners
//! - [`LogicalDataRegistry`]: known locations per version and copy dedup
//! - [`TransferAdaptor`]: the pluggable mover, with [`MockTransfer`] for tests

mod location;
mod logical;
mod mock;
mod operation;
mod registry;
mod transfer;

pub use location::*;
pub use logical::*;
pub use mock::*;
pub use operation::*;
pub use registry::*;
pub use transfer::*;
