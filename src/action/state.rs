//! Allocatable action and its state machine

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::data::{DataAccessId, DataInstanceId};
use crate::error::{Error, Result};
use crate::ids::ActionId;
use crate::resource::Job;

use super::{Implementation, TaskDescription};

// ─────────────────────────────────────────────────────────────────
// Action State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    Created,
    /// Waiting on data predecessors
    DataBlocked,
    /// Dependency-free, waiting for a resource
    ReadyToSchedule,
    /// No resource could ever run it with the current pool
    ResourceBlocked,
    /// Assigned; inputs being staged
    Scheduled,
    /// Accepted by the resource
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Created => "created",
            ActionState::DataBlocked => "data_blocked",
            ActionState::ReadyToSchedule => "ready_to_schedule",
            ActionState::ResourceBlocked => "resource_blocked",
            ActionState::Scheduled => "scheduled",
            ActionState::Submitted => "submitted",
            ActionState::Running => "running",
            ActionState::Completed => "completed",
            ActionState::Failed => "failed",
            ActionState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Completed | ActionState::Failed | ActionState::Cancelled
        )
    }

    /// Holds a capacity reservation on its resource
    pub fn holds_resource(&self) -> bool {
        matches!(
            self,
            ActionState::Scheduled | ActionState::Submitted | ActionState::Running
        )
    }

    /// Whether `next` is a legal successor state
    ///
    /// Retries send a failed attempt straight back to `ReadyToSchedule`, so
    /// `Failed` itself is final.
    pub fn can_transition_to(&self, next: ActionState) -> bool {
        use ActionState::*;
        if next == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Created, DataBlocked)
                | (Created, ReadyToSchedule)
                | (DataBlocked, ReadyToSchedule)
                | (ReadyToSchedule, Scheduled)
                | (ReadyToSchedule, ResourceBlocked)
                | (ResourceBlocked, ReadyToSchedule)
                | (ResourceBlocked, Scheduled)
                | (Scheduled, Submitted)
                | (Scheduled, ReadyToSchedule)
                | (Scheduled, Failed)
                | (Submitted, Running)
                | (Submitted, Completed)
                | (Submitted, ReadyToSchedule)
                | (Submitted, Failed)
                | (Running, Completed)
                | (Running, ReadyToSchedule)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Allocatable Action
// ─────────────────────────────────────────────────────────────────

/// Resource and implementation an action was committed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub resource: String,
    pub implementation: Implementation,
}

/// One schedulable task instance
#[derive(Debug)]
pub struct AllocatableAction {
    id: ActionId,
    task: Arc<TaskDescription>,
    accesses: Vec<DataAccessId>,
    state: ActionState,
    data_predecessors: BTreeSet<ActionId>,
    data_successors: BTreeSet<ActionId>,
    assignment: Option<Assignment>,
    job: Option<Job>,
    attempts: u32,
    created_at: Instant,
    ready_at: Option<Instant>,
    submitted_at: Option<Instant>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    error: Option<String>,
}

impl AllocatableAction {
    /// `accesses` holds one descriptor per task parameter, in order
    pub fn new(id: ActionId, task: Arc<TaskDescription>, accesses: Vec<DataAccessId>) -> Self {
        Self {
            id,
            task,
            accesses,
            state: ActionState::Created,
            data_predecessors: BTreeSet::new(),
            data_successors: BTreeSet::new(),
            assignment: None,
            job: None,
            attempts: 0,
            created_at: Instant::now(),
            ready_at: None,
            submitted_at: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn task(&self) -> &Arc<TaskDescription> {
        &self.task
    }

    pub fn accesses(&self) -> &[DataAccessId] {
        &self.accesses
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn priority(&self) -> bool {
        self.task.priority
    }

    pub fn group(&self) -> Option<u64> {
        self.task.group
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: ActionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                action_id: self.id,
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        let now = Instant::now();
        match next {
            ActionState::ReadyToSchedule => {
                self.ready_at = Some(now);
                self.submitted_at = None;
                self.started_at = None;
            }
            ActionState::Submitted => self.submitted_at = Some(now),
            ActionState::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // ─────────────────────────────────────────────────────────────
    // Graph edges
    // ─────────────────────────────────────────────────────────────

    pub fn add_data_predecessor(&mut self, predecessor: ActionId) {
        self.data_predecessors.insert(predecessor);
    }

    /// Drop one predecessor; true if it was the last one
    pub fn remove_data_predecessor(&mut self, predecessor: ActionId) -> bool {
        self.data_predecessors.remove(&predecessor) && self.data_predecessors.is_empty()
    }

    pub fn has_data_predecessors(&self) -> bool {
        !self.data_predecessors.is_empty()
    }

    pub fn data_predecessors(&self) -> &BTreeSet<ActionId> {
        &self.data_predecessors
    }

    pub fn add_data_successor(&mut self, successor: ActionId) {
        self.data_successors.insert(successor);
    }

    pub fn data_successors(&self) -> &BTreeSet<ActionId> {
        &self.data_successors
    }

    // ─────────────────────────────────────────────────────────────
    // Assignment
    // ─────────────────────────────────────────────────────────────

    pub fn assign(&mut self, resource: impl Into<String>, implementation: Implementation) {
        self.assignment = Some(Assignment {
            resource: resource.into(),
            implementation,
        });
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    pub fn take_assignment(&mut self) -> Option<Assignment> {
        self.job = None;
        self.assignment.take()
    }

    pub fn set_job(&mut self, job: Job) {
        self.job = Some(job);
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// Count one more attempt and return the total
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    // ─────────────────────────────────────────────────────────────
    // Data views
    // ─────────────────────────────────────────────────────────────

    /// Versions this action reads
    pub fn inputs(&self) -> impl Iterator<Item = &DataInstanceId> {
        self.accesses.iter().filter_map(|a| a.read_instance())
    }

    /// Versions this action produces
    pub fn outputs(&self) -> impl Iterator<Item = &DataInstanceId> {
        self.accesses.iter().filter_map(|a| a.written_instance())
    }

    // ─────────────────────────────────────────────────────────────
    // Timing
    // ─────────────────────────────────────────────────────────────

    /// Time since the action became ready, or since creation
    pub fn waiting_time(&self) -> Duration {
        self.ready_at.unwrap_or(self.created_at).elapsed()
    }

    /// Execution time of the last attempt, once finished
    pub fn execution_time(&self) -> Option<Duration> {
        let start = self.started_at.or(self.submitted_at)?;
        let end = self.finished_at?;
        Some(end.saturating_duration_since(start))
    }

    /// Time from creation to the final state
    pub fn total_time(&self) -> Duration {
        match self.finished_at {
            Some(end) => end.saturating_duration_since(self.created_at),
            None => self.created_at.elapsed(),
        }
    }
}
