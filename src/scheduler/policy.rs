//! Scheduling policies
//!
//! Every policy fills the same [`Score`] fields through four hooks and is
//! compared by the same rule. Candidate scores are built in layers:
//! - `action_score`: priority, group affinity and submission order
//! - `resource_score`: how suitable a resource is for the action
//! - `implementation_score`: how fast an implementation runs there
//!
//! At the action layer `waiting` orders actions (older first for FIFO,
//! newer first for LIFO). Once a resource is involved it becomes the
//! negated backlog of that resource, so "greater is better" still holds.

use crate::action::{AllocatableAction, Implementation};
use crate::config::PolicyKind;

use super::{ResourceView, Score};

/// Score-generation hooks of one policy
pub trait SchedulingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rank of the action on its own
    fn action_score(&self, action: &AllocatableAction) -> Score;

    /// Rank of a blocked action when the pool changes
    fn blocked_score(&self, action: &AllocatableAction) -> Score {
        self.action_score(action)
    }

    fn resource_score(
        &self,
        action: &AllocatableAction,
        resource: &ResourceView<'_>,
        action_score: &Score,
    ) -> Score;

    fn implementation_score(
        &self,
        action: &AllocatableAction,
        resource: &ResourceView<'_>,
        implementation: &Implementation,
        resource_score: &Score,
    ) -> Score;

    /// Full score of one candidate, or none when the resource cannot run
    /// the implementation right now
    fn score_candidate(
        &self,
        action: &AllocatableAction,
        resource: &ResourceView<'_>,
        implementation: &Implementation,
    ) -> Option<Score> {
        if !resource.resource().can_run_now(&implementation.requirements) {
            return None;
        }
        let action_score = self.action_score(action);
        let resource_score = self.resource_score(action, resource, &action_score);
        Some(self.implementation_score(action, resource, implementation, &resource_score))
    }
}

/// Policy selected by configuration
pub fn from_kind(kind: PolicyKind) -> Box<dyn SchedulingPolicy> {
    match kind {
        PolicyKind::Fifo => Box::new(FifoPolicy),
        PolicyKind::Lifo => Box::new(LifoPolicy),
        PolicyKind::Locality => Box::new(LocalityPolicy),
        PolicyKind::LoadBalancing => Box::new(LoadBalancingPolicy),
        PolicyKind::ConstraintsFifo => Box::new(ConstraintsFifoPolicy),
    }
}

// ─────────────────────────────────────────────────────────────────
// Shared building blocks
// ─────────────────────────────────────────────────────────────────

fn base_score(action: &AllocatableAction, waiting: i64) -> Score {
    Score {
        action: action.priority() as i64,
        // Lower group ids win
        group: action.group().map(|g| -(g as i64)).unwrap_or(0),
        resource: 0,
        waiting,
        implementation: 0,
    }
}

fn fifo_order(action: &AllocatableAction) -> i64 {
    -(action.id() as i64)
}

fn lifo_order(action: &AllocatableAction) -> i64 {
    action.id() as i64
}

/// Negated expected wait on the resource
fn backlog_score(resource: &ResourceView<'_>) -> i64 {
    -(resource.scheduler().backlog_ms() as i64)
}

/// Negated profiled average of the implementation on the resource
fn duration_score(resource: &ResourceView<'_>, implementation: &Implementation) -> i64 {
    -(resource.scheduler().profile(implementation.id).average_ms() as i64)
}

/// Inputs whose read version already sits on the resource
fn inputs_on_host(action: &AllocatableAction, resource: &ResourceView<'_>) -> i64 {
    action
        .inputs()
        .filter(|input| resource.holds(input.renaming()))
        .count() as i64
}

fn locality(action: &AllocatableAction, resource: &ResourceView<'_>) -> i64 {
    // The app host bonus only breaks ties between equal input counts
    inputs_on_host(action, resource) * 2 + resource.resource().is_app_host() as i64
}

// ─────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────

/// Oldest ready action first, idle resources first
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoPolicy;

impl SchedulingPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn action_score(&self, action: &AllocatableAction) -> Score {
        base_score(action, fifo_order(action))
    }

    fn resource_score(&self, _action: &AllocatableAction, resource: &ResourceView<'_>, action_score: &Score) -> Score {
        action_score
            .with_resource(resource.scheduler().is_idle() as i64)
            .with_waiting(backlog_score(resource))
    }

    fn implementation_score(
        &self,
        _action: &AllocatableAction,
        resource: &ResourceView<'_>,
        implementation: &Implementation,
        resource_score: &Score,
    ) -> Score {
        resource_score.with_implementation(duration_score(resource, implementation))
    }
}

/// Newest ready action first
#[derive(Debug, Clone, Copy, Default)]
pub struct LifoPolicy;

impl SchedulingPolicy for LifoPolicy {
    fn name(&self) -> &'static str {
        "lifo"
    }

    fn action_score(&self, action: &AllocatableAction) -> Score {
        base_score(action, lifo_order(action))
    }

    // Waiting stays the submission order, so newer actions keep winning
    fn resource_score(&self, _action: &AllocatableAction, resource: &ResourceView<'_>, action_score: &Score) -> Score {
        action_score.with_resource(resource.scheduler().is_idle() as i64)
    }

    fn implementation_score(
        &self,
        _action: &AllocatableAction,
        resource: &ResourceView<'_>,
        implementation: &Implementation,
        resource_score: &Score,
    ) -> Score {
        resource_score.with_implementation(duration_score(resource, implementation))
    }
}

/// Resources already holding the inputs first
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalityPolicy;

impl SchedulingPolicy for LocalityPolicy {
    fn name(&self) -> &'static str {
        "locality"
    }

    fn action_score(&self, action: &AllocatableAction) -> Score {
        base_score(action, fifo_order(action))
    }

    fn resource_score(&self, action: &AllocatableAction, resource: &ResourceView<'_>, action_score: &Score) -> Score {
        action_score
            .with_resource(locality(action, resource))
            .with_waiting(backlog_score(resource))
    }

    fn implementation_score(
        &self,
        _action: &AllocatableAction,
        resource: &ResourceView<'_>,
        implementation: &Implementation,
        resource_score: &Score,
    ) -> Score {
        resource_score.with_implementation(duration_score(resource, implementation))
    }
}

/// Locality traded against queue depth
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancingPolicy;

impl SchedulingPolicy for LoadBalancingPolicy {
    fn name(&self) -> &'static str {
        "load_balancing"
    }

    fn action_score(&self, action: &AllocatableAction) -> Score {
        base_score(action, fifo_order(action))
    }

    fn resource_score(&self, action: &AllocatableAction, resource: &ResourceView<'_>, action_score: &Score) -> Score {
        let busy = resource.scheduler().queue_depth() as i64;
        action_score
            .with_resource(inputs_on_host(action, resource) - busy)
            .with_waiting(backlog_score(resource))
    }

    fn implementation_score(
        &self,
        _action: &AllocatableAction,
        resource: &ResourceView<'_>,
        implementation: &Implementation,
        resource_score: &Score,
    ) -> Score {
        resource_score.with_implementation(duration_score(resource, implementation))
    }
}

/// Largest jobs first on constrained resources
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintsFifoPolicy;

impl ConstraintsFifoPolicy {
    fn largest_requirement(action: &AllocatableAction) -> i64 {
        action
            .task()
            .implementations
            .iter()
            .map(|i| i.requirements.weight())
            .max()
            .unwrap_or(0)
    }
}

impl SchedulingPolicy for ConstraintsFifoPolicy {
    fn name(&self) -> &'static str {
        "constraints_fifo"
    }

    fn action_score(&self, action: &AllocatableAction) -> Score {
        base_score(action, fifo_order(action)).with_resource(Self::largest_requirement(action))
    }

    fn resource_score(&self, _action: &AllocatableAction, resource: &ResourceView<'_>, action_score: &Score) -> Score {
        action_score.with_waiting(backlog_score(resource))
    }

    fn implementation_score(
        &self,
        _action: &AllocatableAction,
        resource: &ResourceView<'_>,
        implementation: &Implementation,
        resource_score: &Score,
    ) -> Score {
        resource_score
            .with_resource(implementation.requirements.weight())
            .with_implementation(duration_score(resource, implementation))
    }
}
