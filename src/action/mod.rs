//! Schedulable units
//!
//! - [`TaskDescription`]: what the application submitted
//! - [`AllocatableAction`]: one task instance and its state machine

mod description;
mod state;

pub use description::*;
pub use state::*;
