//! Taskgraph core
//!
//! Runtime core of a task-parallel programming model. Applications submit
//! tasks with declared data accesses; the runtime derives dependencies,
//! versions every datum and places ready tasks on resources.
//!
//! Main pieces:
//! - [`data`]: versioned data ledger and access descriptors
//! - [`comm`]: logical data registry, copy deduplication and data operations
//! - [`action`]: task descriptions and the per-action state machine
//! - [`resource`]: resource trait, capacities and a mock resource
//! - [`scheduler`]: scores, policies, resource and task schedulers
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskgraph_core::action::{Parameter, TaskDescription};
//! use taskgraph_core::comm::MockTransfer;
//! use taskgraph_core::config::RuntimeConfig;
//! use taskgraph_core::resource::{MockResource, ResourceRequirements};
//! use taskgraph_core::scheduler::TaskScheduler;
//!
//! # async fn run() -> taskgraph_core::error::Result<()> {
//! let config = RuntimeConfig::load(None)?;
//! let scheduler = TaskScheduler::from_config(&config, Arc::new(MockTransfer::new()));
//! let worker = MockResource::new("worker-1", ResourceRequirements::new(4), scheduler.registry().clone());
//! scheduler.add_resource(Arc::new(worker))?;
//!
//! scheduler.submit_task(TaskDescription::new(1, "produce").with_parameter(Parameter::output("a")))?;
//! scheduler.submit_task(TaskDescription::new(2, "consume").with_parameter(Parameter::input("a")))?;
//! scheduler.barrier().await.map_err(|e| taskgraph_core::error::Error::Internal(e.to_string()))?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod barrier;
pub mod comm;
pub mod config;
pub mod data;
pub mod error;
pub mod ids;
pub mod logging;
pub mod resource;
pub mod scheduler;

pub use barrier::CompletionBarrier;
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use scheduler::{SchedulerStats, TaskScheduler};
