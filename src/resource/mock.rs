//! Mock resource for testing
//!
//! Runs nothing. Jobs either complete on their own after a simulated
//! latency or wait for the test to call [`MockResource::complete_job`] /
//! [`MockResource::fail_job`]. Data requests go through the shared
//! [`LogicalDataRegistry`], so copy dedup behaves as in production.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::debug;

use crate::comm::{DataLocation, DataOperationListener, LogicalDataRegistry, OperationStatus};
use crate::error::{Error, Result};
use crate::ids::JobId;

use super::{
    Capacity, Job, JobEndStatus, JobListener, JobRequest, Resource, ResourceRequirements,
    TransferReason,
};

// ─────────────────────────────────────────────────────────────────
// Mock Resource Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for mock resource behavior
#[derive(Debug, Clone)]
pub struct MockResourceConfig {
    /// Working directory used for data locations, fixed at creation
    pub working_dir: String,

    /// Whether the application runs on this resource
    pub app_host: bool,

    /// Finish jobs without waiting for the test
    pub auto_complete: bool,

    /// Simulated execution time when auto-completing (ms)
    pub execution_ms: u64,

    /// Whether `new_job` rejects jobs
    pub fail_submission: bool,
}

impl Default for MockResourceConfig {
    fn default() -> Self {
        Self {
            working_dir: "/tmp/taskgraph".to_string(),
            app_host: false,
            auto_complete: true,
            execution_ms: 0,
            fail_submission: false,
        }
    }
}

/// Track method call counts for verification
#[derive(Debug, Default)]
struct CallCounts {
    new_job: u32,
    cancel_job: u32,
    get_data: u32,
}

struct PendingJob {
    job: Job,
    listener: Arc<dyn JobListener>,
}

// ─────────────────────────────────────────────────────────────────
// Mock Resource
// ─────────────────────────────────────────────────────────────────

/// In-process resource for tests and dry runs
pub struct MockResource {
    name: String,
    working_dir: String,
    config: RwLock<MockResourceConfig>,
    capacity: Mutex<Capacity>,
    registry: Arc<LogicalDataRegistry>,
    jobs: Arc<Mutex<HashMap<JobId, PendingJob>>>,
    injected_failures: Arc<Mutex<VecDeque<JobEndStatus>>>,
    requests: RwLock<Vec<JobRequest>>,
    call_counts: RwLock<CallCounts>,
}

impl MockResource {
    /// Create a mock resource with default configuration
    pub fn new(
        name: impl Into<String>,
        capacity: ResourceRequirements,
        registry: Arc<LogicalDataRegistry>,
    ) -> Self {
        Self::with_config(name, capacity, registry, MockResourceConfig::default())
    }

    /// Create a mock resource with custom configuration
    pub fn with_config(
        name: impl Into<String>,
        capacity: ResourceRequirements,
        registry: Arc<LogicalDataRegistry>,
        config: MockResourceConfig,
    ) -> Self {
        Self {
            name: name.into(),
            working_dir: config.working_dir.clone(),
            config: RwLock::new(config),
            capacity: Mutex::new(Capacity::new(capacity)),
            registry,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            injected_failures: Arc::new(Mutex::new(VecDeque::new())),
            requests: RwLock::new(Vec::new()),
            call_counts: RwLock::new(CallCounts::default()),
        }
    }

    /// Change the total capacity
    pub fn set_capacity(&self, total: ResourceRequirements) {
        self.capacity.lock().resize(total);
    }

    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.config.write().auto_complete = auto_complete;
    }

    pub fn set_fail_submission(&self, fail: bool) {
        self.config.write().fail_submission = fail;
    }

    /// End the next auto-completed job with `status` instead of success
    pub fn inject_failure(&self, status: JobEndStatus) {
        self.injected_failures.lock().push_back(status);
    }

    /// Get the number of times a method was called
    pub fn call_count(&self, method: &str) -> u32 {
        let counts = self.call_counts.read();
        match method {
            "new_job" => counts.new_job,
            "cancel_job" => counts.cancel_job,
            "get_data" => counts.get_data,
            _ => 0,
        }
    }

    /// Every job request received, in submission order
    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.read().clone()
    }

    /// Jobs accepted and not yet ended, by job id
    pub fn pending_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().values().map(|p| p.job.clone()).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Report a pending job as started
    pub fn start_job(&self, job_id: JobId) -> bool {
        let pending = self
            .jobs
            .lock()
            .get(&job_id)
            .map(|p| (p.job.clone(), p.listener.clone()));
        match pending {
            Some((job, listener)) => {
                listener.job_started(&job);
                true
            }
            None => false,
        }
    }

    /// End a pending job successfully
    pub fn complete_job(&self, job_id: JobId) -> bool {
        finish(&self.jobs, job_id, JobEndStatus::Ok)
    }

    /// End a pending job with a failure status
    pub fn fail_job(&self, job_id: JobId, status: JobEndStatus) -> bool {
        finish(&self.jobs, job_id, status)
    }
}

/// Remove a job and report its end; the lock is released before notifying
fn finish(jobs: &Mutex<HashMap<JobId, PendingJob>>, job_id: JobId, status: JobEndStatus) -> bool {
    let Some(pending) = jobs.lock().remove(&job_id) else {
        return false;
    };
    match status {
        JobEndStatus::Ok => pending.listener.job_completed(&pending.job),
        other => pending.listener.job_failed(&pending.job, other),
    }
    true
}

impl Resource for MockResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_app_host(&self) -> bool {
        self.config.read().app_host
    }

    fn description(&self) -> ResourceRequirements {
        self.capacity.lock().total()
    }

    fn available(&self) -> ResourceRequirements {
        self.capacity.lock().free()
    }

    fn reserve(&self, requirements: &ResourceRequirements) -> bool {
        self.capacity.lock().reserve(requirements)
    }

    fn release(&self, requirements: &ResourceRequirements) {
        self.capacity.lock().release(requirements);
    }

    fn working_dir(&self) -> &str {
        &self.working_dir
    }

    fn new_job(&self, request: JobRequest, listener: Arc<dyn JobListener>) -> Result<Job> {
        self.call_counts.write().new_job += 1;
        self.requests.write().push(request.clone());

        let config = self.config.read().clone();
        if config.fail_submission {
            return Err(Error::JobSubmission {
                resource: self.name.clone(),
                message: "mock submission failure".into(),
            });
        }

        let job = Job::from_request(&request, &self.name);
        self.jobs.lock().insert(
            job.id,
            PendingJob {
                job: job.clone(),
                listener: listener.clone(),
            },
        );
        debug!(resource = %self.name, job_id = job.id, action_id = job.action_id, "Mock job accepted");

        if config.auto_complete {
            if let Ok(handle) = Handle::try_current() {
                let jobs = self.jobs.clone();
                let failures = self.injected_failures.clone();
                let started = job.clone();
                handle.spawn(async move {
                    listener.job_started(&started);
                    if config.execution_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(config.execution_ms)).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                    let status = failures.lock().pop_front().unwrap_or(JobEndStatus::Ok);
                    finish(&jobs, started.id, status);
                });
            }
        }
        Ok(job)
    }

    fn cancel_job(&self, job: &Job) {
        self.call_counts.write().cancel_job += 1;
        if self.jobs.lock().remove(&job.id).is_some() {
            debug!(resource = %self.name, job_id = job.id, "Mock job cancelled");
        }
    }

    fn get_data(
        &self,
        source: &str,
        target: DataLocation,
        reason: TransferReason,
        listener: Arc<dyn DataOperationListener>,
    ) -> Result<OperationStatus> {
        self.call_counts.write().get_data += 1;
        debug!(resource = %self.name, data = source, target = %target, reason = ?reason, "Data requested");
        let obtained = self.registry.obtain(source, target, None, listener)?;
        Ok(obtained.status)
    }

    fn get_all_data_from_host(&self) -> HashSet<String> {
        self.registry.data_on_host(&self.name)
    }
}
