//! Per-resource queue, profiles and the view policies score against

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::ids::ActionId;
use crate::resource::Resource;

use super::Profile;

#[derive(Debug, Clone, Copy)]
struct Queued {
    action_id: ActionId,
    implementation_id: u32,
    staged: bool,
}

#[derive(Default)]
struct QueueState {
    /// Scheduled, not yet submitted, in commit order
    queue: VecDeque<Queued>,
    /// Submitted or running, with their implementation
    running: BTreeMap<ActionId, u32>,
    profiles: HashMap<u32, Profile>,
}

/// Assigned actions of one resource
///
/// Actions are submitted in the order they were committed to the resource:
/// one whose inputs are staged still waits for every earlier action in the
/// queue. Those earlier actions are its resource predecessors.
pub struct ResourceScheduler {
    resource: Arc<dyn Resource>,
    state: Mutex<QueueState>,
}

impl ResourceScheduler {
    pub fn new(resource: Arc<dyn Resource>) -> Self {
        Self {
            resource,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    // ─────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────

    /// Commit an action to this resource
    pub fn enqueue(&self, action_id: ActionId, implementation_id: u32) {
        self.state.lock().queue.push_back(Queued {
            action_id,
            implementation_id,
            staged: false,
        });
    }

    /// Inputs of `action_id` are in place
    ///
    /// Returns the actions that may now be submitted, in order.
    pub fn mark_staged(&self, action_id: ActionId) -> Vec<ActionId> {
        let mut state = self.state.lock();
        if let Some(entry) = state.queue.iter_mut().find(|q| q.action_id == action_id) {
            entry.staged = true;
        }
        Self::drain_front(&mut state)
    }

    /// Forget an action wherever it is; returns actions unblocked by its removal
    pub fn remove(&self, action_id: ActionId) -> Vec<ActionId> {
        let mut state = self.state.lock();
        state.running.remove(&action_id);
        let before = state.queue.len();
        state.queue.retain(|q| q.action_id != action_id);
        if state.queue.len() == before {
            return Vec::new();
        }
        Self::drain_front(&mut state)
    }

    fn drain_front(state: &mut QueueState) -> Vec<ActionId> {
        let mut ready = Vec::new();
        while state.queue.front().is_some_and(|q| q.staged) {
            if let Some(q) = state.queue.pop_front() {
                state.running.insert(q.action_id, q.implementation_id);
                ready.push(q.action_id);
            }
        }
        ready
    }

    /// Queued actions ahead of `action_id`
    pub fn resource_predecessors(&self, action_id: ActionId) -> Vec<ActionId> {
        let state = self.state.lock();
        state
            .queue
            .iter()
            .take_while(|q| q.action_id != action_id)
            .map(|q| q.action_id)
            .collect()
    }

    /// Actions queued or running here
    pub fn queue_depth(&self) -> usize {
        let state = self.state.lock();
        state.queue.len() + state.running.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue_depth() == 0
    }

    pub fn hosted_actions(&self) -> Vec<ActionId> {
        let state = self.state.lock();
        state
            .queue
            .iter()
            .map(|q| q.action_id)
            .chain(state.running.keys().copied())
            .collect()
    }

    /// Expected time until everything queued here is done (ms)
    pub fn backlog_ms(&self) -> u64 {
        let state = self.state.lock();
        let profile_avg = |implementation_id: &u32| {
            state
                .profiles
                .get(implementation_id)
                .copied()
                .unwrap_or_default()
                .average_ms()
        };
        state
            .queue
            .iter()
            .map(|q| profile_avg(&q.implementation_id))
            .chain(state.running.values().map(&profile_avg))
            .sum()
    }

    // ─────────────────────────────────────────────────────────────
    // Profiles
    // ─────────────────────────────────────────────────────────────

    pub fn profile(&self, implementation_id: u32) -> Profile {
        self.state
            .lock()
            .profiles
            .get(&implementation_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn update_profile(&self, implementation_id: u32, elapsed: Duration) {
        let mut state = self.state.lock();
        let profile = state.profiles.entry(implementation_id).or_default();
        profile.update(elapsed);
        trace!(
            resource = self.resource.name(),
            implementation_id,
            average_ms = profile.average_ms(),
            "Profile updated"
        );
    }
}

/// What a policy sees of a resource during one scheduling round
pub struct ResourceView<'a> {
    scheduler: &'a ResourceScheduler,
    host_data: HashSet<String>,
}

impl<'a> ResourceView<'a> {
    /// Snapshot the data held on the resource
    pub fn new(scheduler: &'a ResourceScheduler) -> Self {
        Self {
            host_data: scheduler.resource().get_all_data_from_host(),
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &ResourceScheduler {
        self.scheduler
    }

    pub fn resource(&self) -> &dyn Resource {
        self.scheduler.resource().as_ref()
    }

    /// Whether the value of `renaming` already sits on the resource
    pub fn holds(&self, renaming: &str) -> bool {
        self.host_data.contains(renaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LogicalDataRegistry, MockTransfer};
    use crate::config::TransferSettings;
    use crate::resource::{MockResource, ResourceRequirements};

    fn scheduler() -> ResourceScheduler {
        let registry =
            LogicalDataRegistry::new(Arc::new(MockTransfer::new()), &TransferSettings::default());
        ResourceScheduler::new(Arc::new(MockResource::new(
            "w1",
            ResourceRequirements::new(4),
            registry,
        )))
    }

    #[test]
    fn test_fifo_submission_order() {
        let rs = scheduler();
        rs.enqueue(1, 0);
        rs.enqueue(2, 0);
        rs.enqueue(3, 0);
        assert_eq!(rs.resource_predecessors(3), vec![1, 2]);

        // Staged out of order: nothing moves until the head is staged
        assert!(rs.mark_staged(2).is_empty());
        assert!(rs.mark_staged(3).is_empty());
        assert_eq!(rs.mark_staged(1), vec![1, 2, 3]);
        assert_eq!(rs.queue_depth(), 3);
    }

    #[test]
    fn test_removing_head_unblocks() {
        let rs = scheduler();
        rs.enqueue(1, 0);
        rs.enqueue(2, 0);
        rs.mark_staged(2);
        assert_eq!(rs.remove(1), vec![2]);
        rs.remove(2);
        assert!(rs.is_idle());
    }

    #[test]
    fn test_backlog_uses_profiles() {
        let rs = scheduler();
        rs.update_profile(7, Duration::from_millis(30));
        rs.enqueue(1, 7);
        rs.enqueue(2, 0);
        assert_eq!(rs.backlog_ms(), 30 + crate::scheduler::DEFAULT_EXECUTION_MS);
        assert_eq!(rs.profile(7).executions(), 1);
    }
}
