//! Versioned data ledger
//!
//! Tracks every live version of every datum together with the readers and
//! writers still pending on it:
//! - [`DataVersion`] and [`DataInfo`] hold the per-datum history
//! - [`DataAccessId`] is the descriptor a task parameter gets at submission
//! - [`DataInfoProvider`] maps names to ledger entries

mod access;
mod info;
mod provider;
mod version;

pub use access::*;
pub use info::*;
pub use provider::*;
pub use version::*;
