//! Resource and job contracts
//!
//! The core never opens a socket or spawns a process. It asks a
//! [`Resource`] to run jobs and move data, then waits for callbacks on
//! [`JobListener`] and [`DataOperationListener`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{Direction, Implementation};
use crate::comm::{DataLocation, DataOperationListener, OperationStatus};
use crate::error::Result;
use crate::ids::{ActionId, JobId};

use super::ResourceRequirements;

// ─────────────────────────────────────────────────────────────────
// Jobs
// ─────────────────────────────────────────────────────────────────

/// How a job ended, as reported by the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEndStatus {
    Ok,
    /// The resource gave the job back; run it somewhere else
    ToReschedule,
    TransfersFailed,
    SubmissionFailed,
    ExecutionFailed,
}

impl JobEndStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEndStatus::Ok => "OK",
            JobEndStatus::ToReschedule => "TO_RESCHEDULE",
            JobEndStatus::TransfersFailed => "TRANSFERS_FAILED",
            JobEndStatus::SubmissionFailed => "SUBMISSION_FAILED",
            JobEndStatus::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

impl fmt::Display for JobEndStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One parameter as the job sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameter {
    /// Application-level data name
    pub data: String,
    pub direction: Direction,
    /// Renaming of the version read, staged on the resource beforehand
    pub input: Option<String>,
    /// Renaming of the version the job must produce
    pub output: Option<String>,
    /// The staged input must survive the job: copy it rather than move or
    /// overwrite it in place
    pub preserve_source: bool,
}

/// Everything a resource needs to run one attempt of an action
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub action_id: ActionId,
    pub task_id: u64,
    pub task_name: String,
    pub implementation: Implementation,
    pub parameters: Vec<JobParameter>,
    /// Extra nodes for multi-node implementations
    pub slave_nodes: Vec<String>,
}

/// Handle of a job accepted by a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub action_id: ActionId,
    pub task_id: u64,
    pub resource: String,
    pub implementation_id: u32,
}

impl Job {
    pub fn from_request(request: &JobRequest, resource: &str) -> Self {
        Self {
            id: request.job_id,
            action_id: request.action_id,
            task_id: request.task_id,
            resource: resource.to_string(),
            implementation_id: request.implementation.id,
        }
    }
}

/// Receiver of job outcomes
pub trait JobListener: Send + Sync {
    fn job_completed(&self, job: &Job);
    fn job_failed(&self, job: &Job, status: JobEndStatus);

    /// The job started executing
    fn job_started(&self, _job: &Job) {}
}

// ─────────────────────────────────────────────────────────────────
// Resource
// ─────────────────────────────────────────────────────────────────

/// Why data is being moved to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferReason {
    /// Input staging before a job
    JobInput,
    /// Copy requested by the application
    Application,
    /// Extra replica for locality
    Replica,
}

/// A worker able to run jobs and receive data
///
/// Capacity calls must be cheap and must never call back into the scheduler.
pub trait Resource: Send + Sync {
    /// Unique resource name, also its host name for data locations
    fn name(&self) -> &str;

    /// Whether the application itself runs here
    fn is_app_host(&self) -> bool {
        false
    }

    /// Total capacity
    fn description(&self) -> ResourceRequirements;

    /// Free capacity right now
    fn available(&self) -> ResourceRequirements;

    fn can_run_now(&self, requirements: &ResourceRequirements) -> bool {
        requirements.fits_in(&self.available())
    }

    /// Take `requirements` out of the free capacity; false if it no longer fits
    fn reserve(&self, requirements: &ResourceRequirements) -> bool;

    fn release(&self, requirements: &ResourceRequirements);

    /// Directory where staged inputs and job outputs live
    fn working_dir(&self) -> &str;

    /// Location of a renaming inside the working directory
    fn location_of(&self, renaming: &str) -> DataLocation {
        DataLocation::in_dir(self.name(), self.working_dir(), renaming)
    }

    /// Start a job; outcomes arrive on `listener`
    fn new_job(&self, request: JobRequest, listener: Arc<dyn JobListener>) -> Result<Job>;

    /// Best-effort abort of a submitted job
    fn cancel_job(&self, _job: &Job) {}

    /// Make `source` available at `target`
    ///
    /// On `Err` the listener is never notified.
    fn get_data(
        &self,
        source: &str,
        target: DataLocation,
        reason: TransferReason,
        listener: Arc<dyn DataOperationListener>,
    ) -> Result<OperationStatus>;

    /// Renamings with a copy on this resource
    fn get_all_data_from_host(&self) -> HashSet<String>;
}

impl fmt::Debug for dyn Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name())
            .field("description", &self.description())
            .finish()
    }
}
