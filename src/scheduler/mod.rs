//! Scheduling core
//!
//! - [`Score`]: lexicographic ranking of candidate assignments
//! - [`SchedulingPolicy`]: pluggable scoring, selected by [`PolicyKind`](crate::config::PolicyKind)
//! - [`ResourceScheduler`]: per-resource queue and execution profiles
//! - [`TaskScheduler`]: the global orchestrator tying ledger, registry and resources together

mod policy;
mod profile;
mod resource_scheduler;
mod score;
mod task_scheduler;

pub use policy::*;
pub use profile::*;
pub use resource_scheduler::*;
pub use score::*;
pub use task_scheduler::*;
