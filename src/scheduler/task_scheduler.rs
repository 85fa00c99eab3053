//! Task scheduler: the global orchestrator
//!
//! Turns submitted tasks into actions, derives their data dependencies from
//! the access descriptors, and on every trigger (submission, completion,
//! capacity change) ranks the dependency-free pool against the resources.
//! Applications can wait for everything, for one task group, or for the
//! producer of one datum.
//!
//! Locking discipline:
//! - the action graph sits behind one mutex; ledger, registry and resource
//!   locks are only ever taken *inside* it, never the other way round
//! - anything that may call back into the scheduler (data requests, job
//!   submission, capacity release) runs after the graph lock is dropped

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::action::{ActionState, AllocatableAction, DataType, OnFailure, Parameter, TaskDescription};
use crate::barrier::CompletionBarrier;
use crate::comm::{DataLocation, DataOperation, LogicalDataRegistry, OperationGroup, OperationKind, TransferAdaptor};
use crate::config::{RuntimeConfig, SchedulerSettings};
use crate::data::{DataAccessId, DataInfoProvider};
use crate::error::{Error, Result};
use crate::ids::{ActionId, DataId, JobId, RuntimeIds};
use crate::resource::{
    Job, JobEndStatus, JobListener, JobParameter, JobRequest, Resource, ResourceRequirements,
    TransferReason,
};

use super::{policy, ResourceScheduler, ResourceView, SchedulingPolicy, Score};

// ─────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────

/// Scheduler counters
///
/// `blocked` and `unassigned` are the current pool sizes; the rest count
/// events since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub blocked: u64,
    pub unassigned: u64,
}

// ─────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GraphState {
    /// Live actions
    actions: HashMap<ActionId, AllocatableAction>,
    /// Live action that produces each (data, version)
    producers: HashMap<(DataId, u32), ActionId>,
    /// Dependency-free actions not committed to a resource
    unassigned: BTreeSet<ActionId>,
    /// Actions no resource in the pool could ever host
    blocked: BTreeSet<ActionId>,
    /// Final state of retired actions, oldest evicted first
    history: HashMap<ActionId, ActionState>,
    history_order: VecDeque<ActionId>,
    /// Outstanding members per task group
    groups: HashMap<u64, CompletionBarrier>,
    /// Waiters on a live producer, keyed by the producing action
    data_waiters: HashMap<ActionId, CompletionBarrier>,
    stats: SchedulerStats,
}

/// How an action left the graph
struct Retirement {
    state: ActionState,
    group: Option<u64>,
    /// Unrecoverable failure, also reported to the action's group
    failure: Option<Error>,
    /// Why waiters on the action's outputs will never see them
    outputs_lost: Option<Error>,
}

impl Retirement {
    fn new(state: ActionState, group: Option<u64>) -> Self {
        Self {
            state,
            group,
            failure: None,
            outputs_lost: None,
        }
    }
}

struct Release {
    resource: String,
    action_id: ActionId,
    requirements: ResourceRequirements,
}

/// Side effects collected under the graph lock and applied after it
#[derive(Default)]
struct Effects {
    releases: Vec<Release>,
    cancel_jobs: Vec<Job>,
    evicted: Vec<String>,
    finished: usize,
    failure: Option<Error>,
}

#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    score: Score,
    action_id: ActionId,
    resource: usize,
    implementation: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Equal scores: older actions, then earlier resources, win
        self.score
            .cmp(&other.score)
            .then_with(|| other.action_id.cmp(&self.action_id))
            .then_with(|| other.resource.cmp(&self.resource))
            .then_with(|| other.implementation.cmp(&self.implementation))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Scheduler
// ─────────────────────────────────────────────────────────────────

/// Global orchestrator of one runtime
pub struct TaskScheduler {
    settings: SchedulerSettings,
    policy: Box<dyn SchedulingPolicy>,
    ids: Arc<RuntimeIds>,
    ledger: Arc<DataInfoProvider>,
    registry: Arc<LogicalDataRegistry>,
    resources: RwLock<BTreeMap<String, Arc<ResourceScheduler>>>,
    graph: Mutex<GraphState>,
    barrier: CompletionBarrier,
    self_ref: Weak<TaskScheduler>,
}

impl TaskScheduler {
    pub fn new(
        settings: SchedulerSettings,
        ids: Arc<RuntimeIds>,
        ledger: Arc<DataInfoProvider>,
        registry: Arc<LogicalDataRegistry>,
    ) -> Arc<Self> {
        let policy = policy::from_kind(settings.policy);
        info!(
            policy = policy.name(),
            max_retries = settings.max_retries,
            app_host = %settings.app_host,
            "Task scheduler created"
        );
        Arc::new_cyclic(|self_ref| Self {
            settings,
            policy,
            ids,
            ledger,
            registry,
            resources: RwLock::new(BTreeMap::new()),
            graph: Mutex::new(GraphState::default()),
            barrier: CompletionBarrier::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Build a complete runtime core from configuration
    pub fn from_config(config: &RuntimeConfig, adaptor: Arc<dyn TransferAdaptor>) -> Arc<Self> {
        let ids = RuntimeIds::shared();
        let ledger = Arc::new(DataInfoProvider::new(ids.clone()));
        let registry = LogicalDataRegistry::new(adaptor, &config.transfers);
        Self::new(config.scheduler.clone(), ids, ledger, registry)
    }

    pub fn ids(&self) -> &Arc<RuntimeIds> {
        &self.ids
    }

    pub fn ledger(&self) -> &Arc<DataInfoProvider> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<LogicalDataRegistry> {
        &self.registry
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    fn resource_scheduler(&self, name: &str) -> Option<Arc<ResourceScheduler>> {
        self.resources.read().get(name).cloned()
    }

    fn resource_list(&self) -> Vec<Arc<ResourceScheduler>> {
        self.resources.read().values().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────

    /// Register a task and schedule it as soon as its inputs allow
    pub fn submit_task(&self, task: TaskDescription) -> Result<ActionId> {
        if task.implementations.is_empty() {
            return Err(Error::NotSupported(format!(
                "task '{}' has no implementation",
                task.name
            )));
        }
        let task = Arc::new(task);
        let mut evicted = Vec::new();

        let (action_id, state) = {
            let mut guard = self.graph.lock();
            let graph = &mut *guard;

            let mut accesses: Vec<DataAccessId> = Vec::with_capacity(task.parameters.len());
            for param in &task.parameters {
                match self
                    .ledger
                    .register_access(&param.data, param.direction.access_mode())
                {
                    Ok((access, gone)) => {
                        evicted.extend(gone);
                        self.register_original(graph, param, &access);
                        accesses.push(access);
                    }
                    Err(e) => {
                        for access in accesses.iter().rev() {
                            if let Ok(gone) = self.ledger.data_access_canceled(access) {
                                evicted.extend(gone);
                            }
                        }
                        drop(guard);
                        self.purge(evicted);
                        return Err(e);
                    }
                }
            }

            let action_id = self.ids.action.next_id();
            let mut action = AllocatableAction::new(action_id, task.clone(), accesses);
            for predecessor in Self::dependencies(graph, &action) {
                if let Some(pred) = graph.actions.get_mut(&predecessor) {
                    pred.add_data_successor(action_id);
                    action.add_data_predecessor(predecessor);
                }
            }
            for output in action.outputs() {
                graph
                    .producers
                    .insert((output.data_id, output.version_id), action_id);
            }

            let state = if action.has_data_predecessors() {
                ActionState::DataBlocked
            } else {
                graph.unassigned.insert(action_id);
                ActionState::ReadyToSchedule
            };
            action.transition(state)?;

            graph.stats.submitted += 1;
            if let Some(group) = task.group {
                graph.groups.entry(group).or_default().register();
            }
            graph.actions.insert(action_id, action);
            self.barrier.register();
            (action_id, state)
        };

        debug!(
            action_id,
            task_id = task.task_id,
            task = %task.name,
            state = %state,
            "Task submitted"
        );
        self.purge(evicted);
        self.schedule();
        Ok(action_id)
    }

    /// Record where an original value lives the first time it is read
    fn register_original(&self, graph: &GraphState, param: &Parameter, access: &DataAccessId) {
        let Some(read) = access.read_instance() else {
            return;
        };
        if read.version_id != 1
            || graph.producers.contains_key(&(read.data_id, 1))
            || self.registry.contains(read.renaming())
        {
            return;
        }

        let origin = param
            .origin
            .clone()
            .unwrap_or_else(|| DataLocation::new(self.settings.app_host.clone(), param.data.clone()));
        trace!(data = %param.data, renaming = read.renaming(), origin = %origin, "Original value registered");
        self.registry.add_location(read.renaming(), origin);
        if param.data_type == DataType::File {
            self.registry.add_alias(read.renaming(), &param.data);
        }
    }

    /// Live producers this action must wait for
    ///
    /// A reader waits for the producer of the version it reads; a writer
    /// waits for the producer of the version it supersedes.
    fn dependencies(graph: &GraphState, action: &AllocatableAction) -> BTreeSet<ActionId> {
        let mut keys = Vec::new();
        for access in action.accesses() {
            if let Some(read) = access.read_instance() {
                keys.push((read.data_id, read.version_id));
            }
            if let Some(written) = access.written_instance() {
                if written.version_id > 1 {
                    keys.push((written.data_id, written.version_id - 1));
                }
            }
        }

        keys.into_iter()
            .filter_map(|key| graph.producers.get(&key).copied())
            .filter(|producer| {
                graph
                    .actions
                    .get(producer)
                    .is_some_and(|p| !p.state().is_terminal())
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Scheduling round
    // ─────────────────────────────────────────────────────────────

    /// Assign as many ready actions as the pool allows
    pub fn schedule(&self) {
        if self.graph.lock().unassigned.is_empty() {
            return;
        }

        let resources = self.resource_list();
        let views: Vec<ResourceView<'_>> = resources
            .iter()
            .map(|rs| ResourceView::new(rs.as_ref()))
            .collect();

        let committed = {
            let mut guard = self.graph.lock();
            self.assign(&mut guard, &resources, &views)
        };

        for (action_id, rs) in committed {
            self.stage(action_id, rs);
        }
    }

    fn assign(
        &self,
        graph: &mut GraphState,
        resources: &[Arc<ResourceScheduler>],
        views: &[ResourceView<'_>],
    ) -> Vec<(ActionId, Arc<ResourceScheduler>)> {
        let mut heap = BinaryHeap::new();
        for action_id in &graph.unassigned {
            let Some(action) = graph.actions.get(action_id) else {
                continue;
            };
            for (r, view) in views.iter().enumerate() {
                for (i, implementation) in action.task().implementations.iter().enumerate() {
                    if let Some(score) = self.policy.score_candidate(action, view, implementation) {
                        heap.push(Candidate {
                            score,
                            action_id: *action_id,
                            resource: r,
                            implementation: i,
                        });
                    }
                }
            }
        }

        let mut committed = Vec::new();
        let mut done = HashSet::new();
        while let Some(candidate) = heap.pop() {
            if done.contains(&candidate.action_id) {
                continue;
            }
            let Some(action) = graph.actions.get_mut(&candidate.action_id) else {
                continue;
            };
            let rs = &resources[candidate.resource];
            let implementation = action.task().implementations[candidate.implementation].clone();

            // Earlier commits this round may have used the capacity up
            if !rs.resource().reserve(&implementation.requirements) {
                continue;
            }
            if let Err(e) = action.transition(ActionState::Scheduled) {
                warn!(action_id = candidate.action_id, error = %e, "Cannot schedule action");
                rs.resource().release(&implementation.requirements);
                continue;
            }

            debug!(
                action_id = candidate.action_id,
                resource = rs.name(),
                implementation = implementation.id,
                score = %candidate.score,
                "Action scheduled"
            );
            rs.enqueue(candidate.action_id, implementation.id);
            action.assign(rs.name(), implementation);
            done.insert(candidate.action_id);
            committed.push((candidate.action_id, rs.clone()));
        }

        for action_id in &done {
            graph.unassigned.remove(action_id);
        }

        let leftovers: Vec<ActionId> = graph.unassigned.iter().copied().collect();
        for action_id in leftovers {
            let Some(action) = graph.actions.get_mut(&action_id) else {
                graph.unassigned.remove(&action_id);
                continue;
            };
            match Self::unschedulable(action, resources) {
                Error::ActionBlocked { .. } => {
                    if action.transition(ActionState::ResourceBlocked).is_ok() {
                        debug!(action_id, "Action blocked: no compatible resource");
                        graph.unassigned.remove(&action_id);
                        graph.blocked.insert(action_id);
                    }
                }
                e => trace!(action_id, reason = %e, "Action left unassigned"),
            }
        }

        committed
    }

    /// Why an action got no assignment this round
    fn unschedulable(action: &AllocatableAction, resources: &[Arc<ResourceScheduler>]) -> Error {
        if Self::fits_somewhere(action, resources) {
            Error::ActionUnassigned {
                action_id: action.id(),
            }
        } else {
            Error::ActionBlocked {
                action_id: action.id(),
            }
        }
    }

    /// Some implementation fits the total capacity of some resource
    fn fits_somewhere(action: &AllocatableAction, resources: &[Arc<ResourceScheduler>]) -> bool {
        let implementations = &action.task().implementations;
        resources.iter().any(|rs| {
            let total = rs.resource().description();
            implementations.iter().any(|i| i.requirements.fits_in(&total))
        })
    }

    /// Move blocked actions that some resource can now host back to the pool
    fn reexamine_blocked(&self) {
        let resources = self.resource_list();
        let mut guard = self.graph.lock();
        let graph = &mut *guard;

        let mut blocked: Vec<(Score, ActionId)> = graph
            .blocked
            .iter()
            .filter_map(|id| {
                graph
                    .actions
                    .get(id)
                    .map(|a| (self.policy.blocked_score(a), *id))
            })
            .collect();
        blocked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, action_id) in blocked {
            let Some(action) = graph.actions.get_mut(&action_id) else {
                graph.blocked.remove(&action_id);
                continue;
            };
            if !Self::fits_somewhere(action, &resources) {
                continue;
            }
            if action.transition(ActionState::ReadyToSchedule).is_ok() {
                debug!(action_id, "Blocked action released");
                graph.blocked.remove(&action_id);
                graph.unassigned.insert(action_id);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Staging and submission
    // ─────────────────────────────────────────────────────────────

    /// Request every input of a scheduled action on its resource
    fn stage(&self, action_id: ActionId, rs: Arc<ResourceScheduler>) {
        let inputs: Vec<(DataId, String)> = {
            let graph = self.graph.lock();
            match graph.actions.get(&action_id) {
                Some(action) if action.state() == ActionState::Scheduled => action
                    .inputs()
                    .map(|i| (i.data_id, i.renaming().to_string()))
                    .collect(),
                _ => return,
            }
        };

        let data_ids: Vec<DataId> = inputs.iter().map(|(id, _)| *id).collect();
        let scheduler = self.self_ref.clone();
        let group = OperationGroup::new(move |result| {
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.staging_done(action_id, &data_ids, result);
            }
        });

        for (data_id, renaming) in &inputs {
            if let Err(e) = self.ledger.block_deletions(*data_id) {
                warn!(action_id, data_id, error = %e, "Cannot block deletions");
            }
            group.add_operation();
            let target = rs.resource().location_of(renaming);
            match rs.resource().get_data(
                renaming,
                target.clone(),
                TransferReason::JobInput,
                group.clone(),
            ) {
                Ok(status) => trace!(action_id, data = %renaming, status = %status, "Input requested"),
                Err(e) => {
                    // The resource never saw the listener; settle the slot ourselves
                    let failed = DataOperation::settled(
                        OperationKind::Copy {
                            data: renaming.clone(),
                            target,
                        },
                        Err(Arc::new(e)),
                    );
                    failed.add_listener(group.clone());
                }
            }
        }
        group.enable();
    }

    fn staging_done(
        &self,
        action_id: ActionId,
        data_ids: &[DataId],
        result: std::result::Result<(), Arc<Error>>,
    ) {
        let mut evicted = Vec::new();
        for data_id in data_ids {
            match self.ledger.unblock_deletions(*data_id) {
                Ok(gone) => evicted.extend(gone),
                Err(e) => trace!(data_id, error = %e, "Unblock on a forgotten datum"),
            }
        }
        self.purge(evicted);

        if let Err(e) = result {
            warn!(action_id, error = %e, "Input staging failed");
            self.handle_failure(action_id, None, JobEndStatus::TransfersFailed, Some(e.to_string()));
            return;
        }

        let resource = {
            let graph = self.graph.lock();
            match graph.actions.get(&action_id) {
                Some(action) if action.state() == ActionState::Scheduled => {
                    action.assignment().map(|a| a.resource.clone())
                }
                _ => None,
            }
        };
        if let Some(rs) = resource.and_then(|name| self.resource_scheduler(&name)) {
            let ready = rs.mark_staged(action_id);
            self.submit_jobs(&rs, ready);
        }
    }

    /// Hand staged actions to their resource, in queue order
    fn submit_jobs(&self, rs: &Arc<ResourceScheduler>, ready: Vec<ActionId>) {
        for action_id in ready {
            let request = {
                let mut graph = self.graph.lock();
                let Some(action) = graph.actions.get_mut(&action_id) else {
                    continue;
                };
                if action.state() != ActionState::Scheduled {
                    continue;
                }
                let Some(assignment) = action.assignment().cloned() else {
                    continue;
                };

                let parameters = action
                    .task()
                    .parameters
                    .iter()
                    .zip(action.accesses())
                    .map(|(param, access)| JobParameter {
                        data: param.data.clone(),
                        direction: param.direction,
                        input: access.read_instance().map(|i| i.renaming().to_string()),
                        output: access.written_instance().map(|i| i.renaming().to_string()),
                        preserve_source: access.preserve_source(),
                    })
                    .collect();
                let request = JobRequest {
                    job_id: self.ids.job.next_id(),
                    action_id,
                    task_id: action.task().task_id,
                    task_name: action.task().name.clone(),
                    implementation: assignment.implementation,
                    parameters,
                    slave_nodes: Vec::new(),
                };
                if action.transition(ActionState::Submitted).is_err() {
                    continue;
                }
                action.set_job(Job::from_request(&request, rs.name()));
                request
            };

            let job_id = request.job_id;
            let listener: Arc<dyn JobListener> = Arc::new(ActionJobListener {
                scheduler: self.self_ref.clone(),
            });
            match rs.resource().new_job(request, listener) {
                Ok(job) => debug!(action_id, job_id = job.id, resource = rs.name(), "Job submitted"),
                Err(e) => {
                    warn!(action_id, job_id, error = %e, "Job submission failed");
                    self.handle_failure(
                        action_id,
                        Some(job_id),
                        JobEndStatus::SubmissionFailed,
                        Some(e.to_string()),
                    );
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Job outcomes
    // ─────────────────────────────────────────────────────────────

    fn is_current_job(action: &AllocatableAction, job_id: JobId) -> bool {
        action.job().map(|j| j.id) == Some(job_id)
    }

    fn job_started(&self, job: &Job) {
        let mut graph = self.graph.lock();
        if let Some(action) = graph.actions.get_mut(&job.action_id) {
            if Self::is_current_job(action, job.id) && action.state() == ActionState::Submitted {
                let _ = action.transition(ActionState::Running);
                trace!(action_id = job.action_id, job_id = job.id, "Job running");
            }
        }
    }

    fn job_completed(&self, job: &Job) {
        let mut effects = Effects::default();
        {
            let mut guard = self.graph.lock();
            let graph = &mut *guard;

            let current = graph
                .actions
                .get(&job.action_id)
                .is_some_and(|a| Self::is_current_job(a, job.id));
            if !current {
                debug!(action_id = job.action_id, job_id = job.id, "Stale job completion ignored");
                return;
            }
            let Some(mut action) = graph.actions.remove(&job.action_id) else {
                return;
            };
            if let Err(e) = action.transition(ActionState::Completed) {
                warn!(action_id = job.action_id, error = %e, "Unexpected completion");
                graph.actions.insert(job.action_id, action);
                return;
            }

            let elapsed = action.execution_time();
            if let Some(assignment) = action.take_assignment() {
                if let Some(rs) = self.resource_scheduler(&assignment.resource) {
                    // Outputs must be locatable before successors are released
                    for output in action.outputs() {
                        self.registry
                            .add_location(output.renaming(), rs.resource().location_of(output.renaming()));
                    }
                    if let Some(elapsed) = elapsed {
                        rs.update_profile(assignment.implementation.id, elapsed);
                    }
                }
                effects.releases.push(Release {
                    resource: assignment.resource,
                    action_id: job.action_id,
                    requirements: assignment.implementation.requirements,
                });
            }

            self.release_accesses(&action, &mut effects);
            Self::release_successors(graph, &action);
            Self::forget_producer(graph, &action);
            graph.stats.completed += 1;
            self.retire(
                graph,
                action.id(),
                Retirement::new(ActionState::Completed, action.group()),
                &mut effects,
            );

            info!(
                action_id = action.id(),
                task = %action.task().name,
                job_id = job.id,
                resource = %job.resource,
                elapsed_ms = elapsed.map(|d| d.as_millis() as u64).unwrap_or(0),
                "Action completed"
            );
        }
        self.apply(effects);
    }

    /// Apply the on-failure policy to a failed attempt
    fn handle_failure(
        &self,
        action_id: ActionId,
        job_id: Option<JobId>,
        status: JobEndStatus,
        message: Option<String>,
    ) {
        let mut effects = Effects::default();
        {
            let mut guard = self.graph.lock();
            let graph = &mut *guard;

            let Some(action) = graph.actions.get_mut(&action_id) else {
                return;
            };
            if let Some(job_id) = job_id {
                if !Self::is_current_job(action, job_id) {
                    debug!(action_id, job_id, "Stale job failure ignored");
                    return;
                }
            }
            if !action.state().holds_resource() {
                return;
            }

            let failed_on = action.take_assignment().map(|assignment| {
                effects.releases.push(Release {
                    resource: assignment.resource.clone(),
                    action_id,
                    requirements: assignment.implementation.requirements,
                });
                assignment.resource
            });
            let attempts = action.record_attempt();
            let on_failure = action.task().on_failure;
            let task_id = action.task().task_id;
            let group = action.group();
            let message = message.unwrap_or_else(|| status.to_string());
            action.set_error(message.clone());

            let retry = (status == JobEndStatus::ToReschedule || on_failure == OnFailure::Retry)
                && attempts <= self.settings.max_retries;
            if retry && action.transition(ActionState::ReadyToSchedule).is_ok() {
                warn!(action_id, attempts, status = %status, "Action failed, rescheduling");
                graph.unassigned.insert(action_id);
                graph.stats.retried += 1;
            } else {
                if let Err(e) = action.transition(ActionState::Failed) {
                    warn!(action_id, error = %e, "Cannot mark action failed");
                }
                graph.stats.failed += 1;
                warn!(action_id, attempts, status = %status, policy = ?on_failure, "Action failed");

                let mut retirement = Retirement::new(ActionState::Failed, group);
                match on_failure {
                    OnFailure::Ignore => {
                        if let Some(action) = graph.actions.remove(&action_id) {
                            // Whatever the job left behind stands in for its outputs
                            if let Some(rs) = failed_on.and_then(|name| self.resource_scheduler(&name)) {
                                for output in action.outputs() {
                                    self.registry.add_location(
                                        output.renaming(),
                                        rs.resource().location_of(output.renaming()),
                                    );
                                }
                            }
                            self.release_accesses(&action, &mut effects);
                            Self::release_successors(graph, &action);
                            Self::forget_producer(graph, &action);
                        }
                    }
                    OnFailure::CancelSuccessors | OnFailure::Fail | OnFailure::Retry => {
                        let unrecoverable = || {
                            if on_failure == OnFailure::Retry {
                                Error::RetriesExhausted { task_id, attempts }
                            } else {
                                Error::execution_failed(task_id, message.clone())
                            }
                        };
                        if on_failure != OnFailure::CancelSuccessors {
                            let err = unrecoverable();
                            error!(action_id, task_id, error = %err, "Unrecoverable task failure");
                            effects.failure = Some(err);
                            retirement.failure = Some(unrecoverable());
                        }
                        retirement.outputs_lost = Some(unrecoverable());
                        for successor in Self::descendants(graph, action_id) {
                            self.cancel_one(graph, successor, &mut effects);
                        }
                        if let Some(action) = graph.actions.remove(&action_id) {
                            self.cancel_accesses(&action, &mut effects);
                            Self::forget_producer(graph, &action);
                        }
                    }
                }
                graph.unassigned.remove(&action_id);
                self.retire(graph, action_id, retirement, &mut effects);
            }
        }
        self.apply(effects);
    }

    // ─────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────

    /// Cancel an action and, transitively, everything depending on it
    ///
    /// Before submission this is purely local. A submitted job is aborted
    /// on its resource on a best-effort basis.
    pub fn cancel_action(&self, action_id: ActionId) -> Result<()> {
        let mut effects = Effects::default();
        {
            let mut guard = self.graph.lock();
            let graph = &mut *guard;
            if !graph.actions.contains_key(&action_id) {
                return Err(Error::ActionNotFound { action_id });
            }
            for successor in Self::descendants(graph, action_id) {
                self.cancel_one(graph, successor, &mut effects);
            }
            self.cancel_one(graph, action_id, &mut effects);
        }
        info!(action_id, cancelled = effects.finished, "Action cancelled");
        self.apply(effects);
        Ok(())
    }

    /// Live transitive successors, deepest first
    fn descendants(graph: &GraphState, root: ActionId) -> Vec<ActionId> {
        let successors = |id: ActionId| -> Vec<ActionId> {
            graph
                .actions
                .get(&id)
                .map(|a| a.data_successors().iter().copied().collect())
                .unwrap_or_default()
        };

        // Iterative post-order: every node comes after all of its successors
        let mut order = Vec::new();
        let mut visited = HashSet::from([root]);
        let mut stack = vec![(root, successors(root))];
        loop {
            let next = match stack.last_mut() {
                Some((_, children)) => children.pop(),
                None => break,
            };
            match next {
                Some(child) => {
                    if visited.insert(child) && graph.actions.contains_key(&child) {
                        stack.push((child, successors(child)));
                    }
                }
                None => {
                    if let Some((node, _)) = stack.pop() {
                        order.push(node);
                    }
                }
            }
        }
        order.pop();
        order
    }

    fn cancel_one(&self, graph: &mut GraphState, action_id: ActionId, effects: &mut Effects) {
        let Some(mut action) = graph.actions.remove(&action_id) else {
            return;
        };
        let state = action.state();
        let group = action.group();
        if action.transition(ActionState::Cancelled).is_err() {
            graph.actions.insert(action_id, action);
            return;
        }
        let job = action.job().cloned();
        let assignment = action.take_assignment();

        if state.holds_resource() {
            if let Some(assignment) = assignment {
                effects.releases.push(Release {
                    resource: assignment.resource,
                    action_id,
                    requirements: assignment.implementation.requirements,
                });
            }
        }
        if matches!(state, ActionState::Submitted | ActionState::Running) {
            effects.cancel_jobs.extend(job);
        }

        self.cancel_accesses(&action, effects);
        Self::forget_producer(graph, &action);
        graph.unassigned.remove(&action_id);
        graph.blocked.remove(&action_id);
        graph.stats.cancelled += 1;
        let mut retirement = Retirement::new(ActionState::Cancelled, group);
        retirement.outputs_lost = Some(Error::ExecutionCancelled { action_id });
        self.retire(graph, action_id, retirement, effects);
        debug!(action_id, from = %state, "Action cancelled");
    }

    // ─────────────────────────────────────────────────────────────
    // Graph bookkeeping
    // ─────────────────────────────────────────────────────────────

    /// Record the final state of an action that left the graph and settle
    /// everything waiting on it
    fn retire(&self, graph: &mut GraphState, action_id: ActionId, retirement: Retirement, effects: &mut Effects) {
        let limit = self.settings.history_limit;
        if limit > 0 {
            graph.history.insert(action_id, retirement.state);
            graph.history_order.push_back(action_id);
            while graph.history_order.len() > limit {
                if let Some(oldest) = graph.history_order.pop_front() {
                    graph.history.remove(&oldest);
                }
            }
        }

        if let Some(waiters) = graph.data_waiters.remove(&action_id) {
            if let Some(lost) = retirement.outputs_lost {
                waiters.fail(lost);
            }
            waiters.complete();
        }

        if let Some(group) = retirement.group {
            if let Some(barrier) = graph.groups.get(&group) {
                if let Some(failure) = retirement.failure {
                    barrier.fail(failure);
                }
                barrier.complete();
                // A failed group stays so later waits still report it
                if barrier.pending() == 0 && barrier.failure().is_none() {
                    graph.groups.remove(&group);
                }
            }
        }
        effects.finished += 1;
    }

    fn release_successors(graph: &mut GraphState, action: &AllocatableAction) {
        for successor in action.data_successors() {
            let Some(s) = graph.actions.get_mut(successor) else {
                continue;
            };
            if s.remove_data_predecessor(action.id())
                && s.state() == ActionState::DataBlocked
                && s.transition(ActionState::ReadyToSchedule).is_ok()
            {
                trace!(action_id = *successor, "Action released");
                graph.unassigned.insert(*successor);
            }
        }
    }

    fn forget_producer(graph: &mut GraphState, action: &AllocatableAction) {
        for output in action.outputs() {
            let key = (output.data_id, output.version_id);
            if graph.producers.get(&key) == Some(&action.id()) {
                graph.producers.remove(&key);
            }
        }
    }

    /// The action touched its data; drop its pending counters
    fn release_accesses(&self, action: &AllocatableAction, effects: &mut Effects) {
        for access in action.accesses() {
            match self.ledger.data_has_been_accessed(access) {
                Ok(gone) => effects.evicted.extend(gone),
                Err(e) => warn!(action_id = action.id(), error = %e, "Access release failed"),
            }
        }
    }

    /// The action never ran; undo its accesses, newest first
    fn cancel_accesses(&self, action: &AllocatableAction, effects: &mut Effects) {
        for access in action.accesses().iter().rev() {
            match self.ledger.data_access_canceled(access) {
                Ok(gone) => effects.evicted.extend(gone),
                Err(e) => warn!(action_id = action.id(), error = %e, "Access cancel failed"),
            }
        }
    }

    /// Drop evicted versions from the registry, deleting their copies
    fn purge(&self, evicted: Vec<String>) {
        for renaming in evicted {
            let deletes = self.registry.remove(&renaming, true);
            trace!(data = %renaming, deletes = deletes.len(), "Version purged");
        }
    }

    fn apply(&self, effects: Effects) {
        // Record the failure before the count can reach zero
        if let Some(failure) = effects.failure {
            self.barrier.fail(failure);
        }
        for job in &effects.cancel_jobs {
            if let Some(rs) = self.resource_scheduler(&job.resource) {
                rs.resource().cancel_job(job);
            }
        }
        for release in effects.releases {
            if let Some(rs) = self.resource_scheduler(&release.resource) {
                let unblocked = rs.remove(release.action_id);
                rs.resource().release(&release.requirements);
                self.submit_jobs(&rs, unblocked);
            }
        }
        self.purge(effects.evicted);
        for _ in 0..effects.finished {
            self.barrier.complete();
        }
        self.schedule();
    }

    // ─────────────────────────────────────────────────────────────
    // Resource pool
    // ─────────────────────────────────────────────────────────────

    pub fn add_resource(&self, resource: Arc<dyn Resource>) -> Result<()> {
        let name = resource.name().to_string();
        let capacity = resource.description();
        {
            let mut resources = self.resources.write();
            if resources.contains_key(&name) {
                return Err(Error::DuplicateResource { name });
            }
            resources.insert(name.clone(), Arc::new(ResourceScheduler::new(resource)));
        }
        info!(resource = %name, capacity = %capacity, "Resource added");
        self.reexamine_blocked();
        self.schedule();
        Ok(())
    }

    /// Take a resource out of the pool
    ///
    /// Its actions are rescheduled elsewhere and its copies forgotten.
    /// Returns the renamings that lost their last known location.
    pub fn remove_resource(&self, name: &str) -> Result<Vec<String>> {
        let rs = self
            .resources
            .write()
            .remove(name)
            .ok_or_else(|| Error::ResourceNotFound {
                name: name.to_string(),
            })?;
        let lost = self.registry.remove_host(name);
        info!(resource = name, lost = lost.len(), "Resource removed");

        for action_id in rs.hosted_actions() {
            let job = self
                .graph
                .lock()
                .actions
                .get(&action_id)
                .and_then(|a| a.job().cloned());
            if let Some(job) = &job {
                rs.resource().cancel_job(job);
            }
            self.handle_failure(
                action_id,
                None,
                JobEndStatus::ToReschedule,
                Some(format!("resource {} removed", name)),
            );
        }
        self.schedule();
        Ok(lost)
    }

    /// The capacity or shape of a resource changed
    pub fn resource_updated(&self, name: &str) -> Result<()> {
        let rs = self
            .resource_scheduler(name)
            .ok_or_else(|| Error::ResourceNotFound {
                name: name.to_string(),
            })?;
        debug!(resource = name, capacity = %rs.resource().description(), "Resource updated");
        self.reexamine_blocked();
        self.schedule();
        Ok(())
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.read().keys().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Data
    // ─────────────────────────────────────────────────────────────

    /// Delete a datum; versions still in use leave once released
    pub fn delete_data(&self, name: &str) -> Result<()> {
        let evicted = self.ledger.delete_data(name)?;
        debug!(data = name, evicted = evicted.len(), "Data deleted");
        self.purge(evicted);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    /// State of a live action, or the final state of a retired one
    pub fn action_state(&self, action_id: ActionId) -> Option<ActionState> {
        let graph = self.graph.lock();
        graph
            .actions
            .get(&action_id)
            .map(|a| a.state())
            .or_else(|| graph.history.get(&action_id).copied())
    }

    pub fn data_predecessors(&self, action_id: ActionId) -> Vec<ActionId> {
        self.graph
            .lock()
            .actions
            .get(&action_id)
            .map(|a| a.data_predecessors().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Actions queued ahead of this one on its resource
    pub fn resource_predecessors(&self, action_id: ActionId) -> Vec<ActionId> {
        match self.assigned_resource(action_id) {
            Some(name) => self
                .resource_scheduler(&name)
                .map(|rs| rs.resource_predecessors(action_id))
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn assigned_resource(&self, action_id: ActionId) -> Option<String> {
        self.graph
            .lock()
            .actions
            .get(&action_id)
            .and_then(|a| a.assignment().map(|x| x.resource.clone()))
    }

    pub fn attempts(&self, action_id: ActionId) -> Option<u32> {
        self.graph.lock().actions.get(&action_id).map(|a| a.attempts())
    }

    pub fn stats(&self) -> SchedulerStats {
        let graph = self.graph.lock();
        let mut stats = graph.stats.clone();
        stats.blocked = graph.blocked.len() as u64;
        stats.unassigned = graph.unassigned.len() as u64;
        stats
    }

    /// Actions not finished yet
    pub fn pending_actions(&self) -> usize {
        self.barrier.pending()
    }

    /// Wait for every submitted action to finish
    ///
    /// Fails only when a task with the fail policy failed, or a task ran out
    /// of retries. Dropping the future cancels the wait.
    pub fn barrier(&self) -> impl Future<Output = std::result::Result<(), Arc<Error>>> + Send + 'static {
        self.barrier.wait()
    }

    /// Wait for every submitted action of one task group to finish
    ///
    /// Resolves at once for a group with nothing pending. Fails when a member
    /// of the group failed unrecoverably.
    pub fn barrier_group(
        &self,
        group: u64,
    ) -> impl Future<Output = std::result::Result<(), Arc<Error>>> + Send + 'static {
        let graph = self.graph.lock();
        let wait = match graph.groups.get(&group) {
            Some(barrier) => barrier.wait(),
            None => CompletionBarrier::new().wait(),
        };
        wait
    }

    /// Wait until the current version of `name` has been produced
    ///
    /// Resolves at once when no live action is producing it. Fails when its
    /// producer fails or is cancelled, since the value will never exist.
    pub fn wait_for_data(
        &self,
        name: &str,
    ) -> impl Future<Output = std::result::Result<(), Arc<Error>>> + Send + 'static {
        let mut guard = self.graph.lock();
        let graph = &mut *guard;
        let producer = self
            .ledger
            .last_version(name)
            .and_then(|v| graph.producers.get(&(v.data_id, v.version_id)).copied());
        let wait = match producer {
            Some(action_id) => {
                debug!(data = name, action_id, "Waiting for data producer");
                graph
                    .data_waiters
                    .entry(action_id)
                    .or_insert_with(|| {
                        let waiters = CompletionBarrier::new();
                        waiters.register();
                        waiters
                    })
                    .wait()
            }
            None => CompletionBarrier::new().wait(),
        };
        wait
    }
}

/// Routes job callbacks back to the scheduler
struct ActionJobListener {
    scheduler: Weak<TaskScheduler>,
}

impl JobListener for ActionJobListener {
    fn job_started(&self, job: &Job) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.job_started(job);
        }
    }

    fn job_completed(&self, job: &Job) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.job_completed(job);
        }
    }

    fn job_failed(&self, job: &Job, status: JobEndStatus) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        if status == JobEndStatus::Ok {
            scheduler.job_completed(job);
        } else {
            scheduler.handle_failure(job.action_id, Some(job.id), status, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(score: i64, action_id: ActionId, resource: usize) -> Candidate {
        Candidate {
            score: Score::new(0, 0, score, 0, 0),
            action_id,
            resource,
            implementation: 0,
        }
    }

    #[test]
    fn test_candidate_heap_order() {
        let mut heap = BinaryHeap::from(vec![
            candidate(1, 5, 0),
            candidate(3, 7, 1),
            candidate(3, 7, 0),
            candidate(3, 2, 1),
        ]);
        let order: Vec<(ActionId, usize)> = std::iter::from_fn(|| heap.pop())
            .map(|c| (c.action_id, c.resource))
            .collect();
        assert_eq!(order, vec![(2, 1), (7, 0), (7, 1), (5, 0)]);
    }

    fn graph_with_edges(edges: &[(ActionId, ActionId)]) -> GraphState {
        let mut graph = GraphState::default();
        let task = Arc::new(TaskDescription::new(0, "t"));
        for id in 1..=5 {
            graph
                .actions
                .insert(id, AllocatableAction::new(id, task.clone(), Vec::new()));
        }
        for (from, to) in edges {
            if let Some(a) = graph.actions.get_mut(from) {
                a.add_data_successor(*to);
            }
            if let Some(a) = graph.actions.get_mut(to) {
                a.add_data_predecessor(*from);
            }
        }
        graph
    }

    #[test]
    fn test_descendants_deepest_first() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4, 5 unrelated
        let graph = graph_with_edges(&[(1, 2), (1, 3), (2, 4), (3, 4)]);
        let order = TaskScheduler::descendants(&graph, 1);

        assert_eq!(order.len(), 3);
        assert!(!order.contains(&1));
        assert!(!order.contains(&5));
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(4) < pos(2));
        assert!(pos(4) < pos(3));
    }

    #[test]
    fn test_descendants_of_leaf() {
        let graph = graph_with_edges(&[(1, 2)]);
        assert!(TaskScheduler::descendants(&graph, 2).is_empty());
    }
}
