//! Task scheduler integration tests
//!
//! Drives the scheduler through mock resources: dependencies, placement,
//! capacity, failures, cancellation and resource churn.

mod common;

use std::sync::Arc;

use common::{consumer, eventually, producer, settings, updater, Runtime};
use taskgraph_core::action::{ActionState, OnFailure, Parameter, TaskDescription};
use taskgraph_core::comm::{MockTransfer, MockTransferConfig};
use taskgraph_core::config::PolicyKind;
use taskgraph_core::error::Error;
use taskgraph_core::ids::ActionId;
use taskgraph_core::resource::{JobEndStatus, MockResource, Resource, ResourceRequirements};
use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

fn only_job(worker: &MockResource) -> taskgraph_core::resource::Job {
    let jobs = worker.pending_jobs();
    assert_eq!(jobs.len(), 1, "expected exactly one pending job: {:?}", jobs);
    jobs.into_iter().next().unwrap()
}

fn job_of(worker: &MockResource, action_id: ActionId) -> taskgraph_core::resource::Job {
    worker
        .pending_jobs()
        .into_iter()
        .find(|j| j.action_id == action_id)
        .expect("no pending job for action")
}

// ─────────────────────────────────────────────────────────────────
// Dependencies
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pipeline_runs_to_completion() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.auto_worker("w1", 4);

    rt.submit(producer(1, "a"));
    rt.submit(consumer(2, "a"));
    rt.barrier().await.unwrap();

    let stats = rt.scheduler.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(rt.scheduler.pending_actions(), 0);

    // The consumer reads exactly the version the producer wrote
    let requests = worker.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].task_id, 1);
    assert_eq!(requests[1].parameters[0].input, requests[0].parameters[0].output);
}

#[tokio::test]
async fn test_consumer_waits_for_producer() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    let p = rt.submit(producer(1, "a"));
    let c = rt.submit(consumer(2, "a"));

    assert_eq!(rt.scheduler.action_state(p), Some(ActionState::Submitted));
    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::DataBlocked));
    assert_eq!(rt.scheduler.data_predecessors(c), vec![p]);
    assert_eq!(rt.scheduler.assigned_resource(p).as_deref(), Some("w1"));

    let job = only_job(&worker);
    assert!(worker.complete_job(job.id));

    assert_eq!(rt.scheduler.action_state(p), Some(ActionState::Completed));
    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::Submitted));
    assert!(rt.scheduler.data_predecessors(c).is_empty());

    let job = only_job(&worker);
    assert_eq!(job.action_id, c);
    worker.complete_job(job.id);
    rt.barrier().await.unwrap();
}

#[tokio::test]
async fn test_update_chain_orders_writers() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    let p = rt.submit(producer(1, "a"));
    let u = rt.submit(updater(2, "a"));
    let c = rt.submit(consumer(3, "a"));

    assert_eq!(rt.scheduler.data_predecessors(u), vec![p]);
    assert_eq!(rt.scheduler.data_predecessors(c), vec![u]);

    for expected in [p, u, c] {
        let job = only_job(&worker);
        assert_eq!(job.action_id, expected);
        worker.complete_job(job.id);
    }
    rt.barrier().await.unwrap();

    let requests = worker.requests();
    let written_by_p = requests[0].parameters[0].output.clone();
    assert!(written_by_p.is_some());
    assert_eq!(requests[1].parameters[0].input, written_by_p);
    assert_ne!(requests[1].parameters[0].output, written_by_p);
    assert_eq!(requests[2].parameters[0].input, requests[1].parameters[0].output);
}

#[tokio::test]
async fn test_independent_writers_run_in_parallel() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    let a = rt.submit(producer(1, "a"));
    let b = rt.submit(producer(2, "b"));

    assert!(rt.scheduler.data_predecessors(b).is_empty());
    assert_eq!(rt.scheduler.action_state(a), Some(ActionState::Submitted));
    assert_eq!(rt.scheduler.action_state(b), Some(ActionState::Submitted));
    assert_eq!(worker.pending_jobs().len(), 2);
}

#[tokio::test]
async fn test_task_without_implementation_is_rejected() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let task = TaskDescription::new(1, "empty").with_implementations(Vec::new());
    let err = rt.scheduler.submit_task(task).unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
    assert_eq!(rt.scheduler.stats().submitted, 0);
}

// ─────────────────────────────────────────────────────────────────
// Input staging
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_original_data_is_staged_from_app_host() {
    let rt = Runtime::new(PolicyKind::Fifo);
    rt.auto_worker("w1", 4);

    rt.submit(consumer(1, "input.txt"));
    rt.barrier().await.unwrap();

    let copies = rt.transfer.copies();
    assert_eq!(copies.len(), 1);
    let (_, source, target) = &copies[0];
    assert_eq!(source.host, common::APP_HOST);
    assert_eq!(source.path, "input.txt");
    assert_eq!(target.host, "w1");
    assert!(target.path.starts_with("/scratch/w1/"));
}

#[tokio::test]
async fn test_concurrent_readers_share_one_copy() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);
    rt.transfer.pause();

    let first = rt.submit(consumer(1, "x"));
    let second = rt.submit(consumer(2, "x"));

    assert_eq!(rt.scheduler.action_state(first), Some(ActionState::Scheduled));
    assert_eq!(rt.scheduler.action_state(second), Some(ActionState::Scheduled));
    assert!(eventually(|| rt.transfer.copy_count() == 1).await);

    rt.transfer.resume();
    assert!(eventually(|| worker.pending_jobs().len() == 2).await);
    assert_eq!(rt.transfer.copy_count(), 1);
}

#[tokio::test]
async fn test_failed_staging_consumes_retries() {
    let transfer = Arc::new(MockTransfer::with_config(MockTransferConfig {
        fail_copies: true,
        ..Default::default()
    }));
    let rt = Runtime::with_transfer(PolicyKind::Fifo, transfer);
    let worker = rt.manual_worker("w1", 4);

    let c = rt.submit(consumer(1, "x"));
    let err = rt.barrier().await.unwrap_err();

    assert!(matches!(*err, Error::RetriesExhausted { task_id: 1, attempts: 3 }));
    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::Failed));
    assert_eq!(worker.call_count("new_job"), 0);
    assert_eq!(rt.transfer.copy_count(), 3);
}

// ─────────────────────────────────────────────────────────────────
// Capacity
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_oversized_task_blocks_until_capacity_grows() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 2);

    let task = producer(1, "a").with_requirements(ResourceRequirements::new(4));
    let id = rt.submit(task);

    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::ResourceBlocked));
    assert_eq!(rt.scheduler.stats().blocked, 1);
    assert_eq!(worker.call_count("new_job"), 0);

    worker.set_capacity(ResourceRequirements::new(4));
    rt.scheduler.resource_updated("w1").unwrap();

    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Submitted));
    assert_eq!(rt.scheduler.stats().blocked, 0);
}

#[tokio::test]
async fn test_busy_resource_leaves_action_unassigned() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let first = rt.submit(producer(1, "a"));
    let second = rt.submit(producer(2, "b"));

    assert_eq!(rt.scheduler.action_state(first), Some(ActionState::Submitted));
    assert_eq!(rt.scheduler.action_state(second), Some(ActionState::ReadyToSchedule));
    assert_eq!(rt.scheduler.stats().unassigned, 1);

    worker.complete_job(only_job(&worker).id);
    assert_eq!(rt.scheduler.action_state(second), Some(ActionState::Submitted));
    assert_eq!(rt.scheduler.stats().unassigned, 0);
}

#[tokio::test]
async fn test_resource_added_later_unblocks() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let id = rt.submit(producer(1, "a"));
    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::ResourceBlocked));

    rt.manual_worker("w1", 1);
    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Submitted));
}

#[tokio::test]
async fn test_update_of_unknown_resource() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let err = rt.scheduler.resource_updated("ghost").unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_duplicate_resource_rejected() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);
    let err = rt.scheduler.add_resource(worker).unwrap_err();
    assert!(matches!(err, Error::DuplicateResource { .. }));
}

// ─────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────

/// Occupy a single-slot worker, queue two tasks, then free the slot
async fn first_after_release(policy: PolicyKind, priority_second: bool) -> (u64, u64, u64) {
    let rt = Runtime::new(policy);
    let worker = rt.manual_worker("w1", 1);

    rt.submit(producer(1, "blocker"));
    let t1 = rt.submit(producer(2, "a"));
    let t2 = rt.submit(producer(3, "b").with_priority(priority_second));

    worker.complete_job(only_job(&worker).id);
    (only_job(&worker).action_id, t1, t2)
}

#[tokio::test]
async fn test_fifo_runs_oldest_first() {
    let (picked, t1, _) = first_after_release(PolicyKind::Fifo, false).await;
    assert_eq!(picked, t1);
}

#[tokio::test]
async fn test_lifo_runs_newest_first() {
    let (picked, _, t2) = first_after_release(PolicyKind::Lifo, false).await;
    assert_eq!(picked, t2);
}

#[tokio::test]
async fn test_priority_overrides_fifo() {
    let (picked, _, t2) = first_after_release(PolicyKind::Fifo, true).await;
    assert_eq!(picked, t2);
}

#[tokio::test]
async fn test_locality_follows_the_data() {
    let rt = Runtime::new(PolicyKind::Locality);
    let small = rt.manual_worker("w1", 1);
    let big = rt.manual_worker("w2", 2);

    // Only w2 can host the producer
    rt.submit(producer(1, "a").with_requirements(ResourceRequirements::new(2)));
    big.complete_job(only_job(&big).id);

    let c = rt.submit(consumer(2, "a"));
    assert_eq!(rt.scheduler.assigned_resource(c).as_deref(), Some("w2"));
    assert!(small.pending_jobs().is_empty());
}

#[tokio::test]
async fn test_load_balancing_spreads_work() {
    let rt = Runtime::new(PolicyKind::LoadBalancing);
    rt.manual_worker("w1", 4);
    rt.manual_worker("w2", 4);

    let a = rt.submit(producer(1, "a"));
    let b = rt.submit(producer(2, "b"));

    let first = rt.scheduler.assigned_resource(a).unwrap();
    let second = rt.scheduler.assigned_resource(b).unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_constraints_fifo_prefers_largest_task() {
    let rt = Runtime::new(PolicyKind::ConstraintsFifo);
    let worker = rt.manual_worker("w1", 2);

    rt.submit(producer(1, "blocker").with_requirements(ResourceRequirements::new(2)));
    let small = rt.submit(producer(2, "a"));
    let large = rt.submit(producer(3, "b").with_requirements(ResourceRequirements::new(2)));

    worker.complete_job(only_job(&worker).id);
    assert_eq!(only_job(&worker).action_id, large);
    assert_eq!(rt.scheduler.action_state(small), Some(ActionState::ReadyToSchedule));
}

// ─────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_job_is_retried() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let id = rt.submit(producer(1, "a"));
    let first = only_job(&worker);
    worker.fail_job(first.id, JobEndStatus::ExecutionFailed);

    let second = only_job(&worker);
    assert_ne!(first.id, second.id);
    assert_eq!(second.action_id, id);
    assert_eq!(rt.scheduler.attempts(id), Some(1));
    assert_eq!(rt.scheduler.stats().retried, 1);

    worker.complete_job(second.id);
    rt.barrier().await.unwrap();
    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Completed));
}

#[tokio::test]
async fn test_retries_exhausted_fails_barrier() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let p = rt.submit(producer(7, "a"));
    let c = rt.submit(consumer(8, "a"));
    for _ in 0..3 {
        worker.fail_job(only_job(&worker).id, JobEndStatus::ExecutionFailed);
    }

    let err = rt.barrier().await.unwrap_err();
    assert!(matches!(*err, Error::RetriesExhausted { task_id: 7, attempts: 3 }));
    assert_eq!(rt.scheduler.action_state(p), Some(ActionState::Failed));
    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::Cancelled));
    assert_eq!(worker.requests().len(), 3);
    assert_eq!(rt.scheduler.pending_actions(), 0);
}

#[tokio::test]
async fn test_auto_completed_failure_recovers() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.auto_worker("w1", 2);
    worker.inject_failure(JobEndStatus::ExecutionFailed);

    let id = rt.submit(producer(1, "a"));
    rt.barrier().await.unwrap();

    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Completed));
    assert_eq!(worker.requests().len(), 2);
    assert_eq!(rt.scheduler.stats().retried, 1);
}

#[tokio::test]
async fn test_ignore_policy_releases_successors() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let p = rt.submit(producer(1, "a").on_failure(OnFailure::Ignore));
    let c = rt.submit(consumer(2, "a"));

    worker.fail_job(only_job(&worker).id, JobEndStatus::ExecutionFailed);
    assert_eq!(rt.scheduler.action_state(p), Some(ActionState::Failed));
    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::Submitted));

    worker.complete_job(only_job(&worker).id);
    rt.barrier().await.unwrap();

    let stats = rt.scheduler.stats();
    assert_eq!((stats.failed, stats.completed, stats.retried), (1, 1, 0));
}

#[tokio::test]
async fn test_cancel_successors_policy() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let p = rt.submit(producer(1, "a").on_failure(OnFailure::CancelSuccessors));
    let u = rt.submit(updater(2, "a"));
    let c = rt.submit(consumer(3, "a"));
    let other = rt.submit(producer(4, "b"));

    worker.fail_job(only_job(&worker).id, JobEndStatus::ExecutionFailed);

    assert_eq!(rt.scheduler.action_state(p), Some(ActionState::Failed));
    assert_eq!(rt.scheduler.action_state(u), Some(ActionState::Cancelled));
    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::Cancelled));
    assert_eq!(rt.scheduler.action_state(other), Some(ActionState::Submitted));

    worker.complete_job(only_job(&worker).id);
    rt.barrier().await.unwrap();
    assert_eq!(rt.scheduler.stats().cancelled, 2);
}

#[tokio::test]
async fn test_fail_policy_surfaces_error() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    rt.submit(producer(5, "a").on_failure(OnFailure::Fail));
    worker.fail_job(only_job(&worker).id, JobEndStatus::ExecutionFailed);

    let err = rt.barrier().await.unwrap_err();
    assert!(matches!(*err, Error::ExecutionFailed { task_id: Some(5), .. }));
    assert_eq!(worker.requests().len(), 1);
}

#[tokio::test]
async fn test_to_reschedule_always_retries() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let id = rt.submit(producer(1, "a").on_failure(OnFailure::Fail));
    worker.fail_job(only_job(&worker).id, JobEndStatus::ToReschedule);

    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Submitted));
    assert_eq!(rt.scheduler.attempts(id), Some(1));
}

#[tokio::test]
async fn test_submission_failure_exhausts_retries() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);
    worker.set_fail_submission(true);

    let id = rt.submit(producer(1, "a"));

    let err = rt.barrier().await.unwrap_err();
    assert!(matches!(*err, Error::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Failed));
    assert_eq!(worker.call_count("new_job"), 3);
}

#[tokio::test]
async fn test_retried_job_reports_running() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let id = rt.submit(producer(1, "a"));
    let first = only_job(&worker);
    worker.fail_job(first.id, JobEndStatus::ExecutionFailed);
    let current = only_job(&worker);

    // The first attempt is gone from the resource
    assert!(!worker.complete_job(first.id));
    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Submitted));

    assert!(worker.start_job(current.id));
    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Running));
}

// ─────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_action_cascades() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    let p = rt.submit(producer(1, "a"));
    let c = rt.submit(consumer(2, "a"));
    rt.scheduler.cancel_action(p).unwrap();

    assert_eq!(rt.scheduler.action_state(p), Some(ActionState::Cancelled));
    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::Cancelled));
    assert_eq!(worker.call_count("cancel_job"), 1);
    assert!(worker.pending_jobs().is_empty());
    rt.barrier().await.unwrap();

    // Capacity came back
    let next = rt.submit(producer(3, "b"));
    assert_eq!(rt.scheduler.action_state(next), Some(ActionState::Submitted));

    let err = rt.scheduler.cancel_action(p).unwrap_err();
    assert!(matches!(err, Error::ActionNotFound { .. }));
}

#[tokio::test]
async fn test_cancel_blocked_action_is_local() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    rt.submit(producer(1, "a"));
    let c = rt.submit(consumer(2, "a"));
    rt.scheduler.cancel_action(c).unwrap();

    assert_eq!(rt.scheduler.action_state(c), Some(ActionState::Cancelled));
    assert_eq!(worker.call_count("cancel_job"), 0);
    assert_eq!(rt.scheduler.pending_actions(), 1);
}

// ─────────────────────────────────────────────────────────────────
// Resource churn
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_removing_resource_reschedules_its_actions() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let w1 = rt.manual_worker("w1", 1);
    let w2 = rt.manual_worker("w2", 1);

    let id = rt.submit(producer(1, "a"));
    let host = rt.scheduler.assigned_resource(id).unwrap();
    let (gone, survivor) = if host == "w1" { (&w1, &w2) } else { (&w2, &w1) };

    rt.scheduler.remove_resource(&host).unwrap();

    assert_eq!(gone.call_count("cancel_job"), 1);
    assert_eq!(rt.scheduler.action_state(id), Some(ActionState::Submitted));
    assert_eq!(
        rt.scheduler.assigned_resource(id).as_deref(),
        Some(survivor.name())
    );
    assert_eq!(rt.scheduler.attempts(id), Some(1));
}

#[tokio::test]
async fn test_removing_resource_reports_lost_data() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    rt.submit(producer(1, "a"));
    let job = only_job(&worker);
    let output = worker.requests()[0].parameters[0].output.clone().unwrap();
    worker.complete_job(job.id);

    let lost = rt.scheduler.remove_resource("w1").unwrap();
    assert_eq!(lost, vec![output]);
    assert!(rt.scheduler.resource_names().is_empty());
    assert!(matches!(
        rt.scheduler.remove_resource("w1"),
        Err(Error::ResourceNotFound { .. })
    ));
}

// ─────────────────────────────────────────────────────────────────
// Data deletion
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_data_waits_for_readers() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 1);

    rt.submit(producer(1, "a"));
    rt.submit(updater(2, "a"));
    rt.submit(consumer(3, "a"));
    worker.complete_job(only_job(&worker).id);
    worker.complete_job(only_job(&worker).id);

    // The consumer still reads the second version
    let v2 = worker.requests()[1].parameters[0].output.clone().unwrap();
    rt.scheduler.delete_data("a").unwrap();
    assert!(rt.scheduler.registry().contains(&v2));

    worker.complete_job(only_job(&worker).id);
    assert!(!rt.scheduler.registry().contains(&v2));
    assert!(eventually(|| rt.transfer.deletes().iter().any(|l| l.path.ends_with(&v2))).await);

    rt.barrier().await.unwrap();
    assert!(matches!(
        rt.scheduler.delete_data("a"),
        Err(Error::DataNotFound { .. })
    ));
}

#[tokio::test]
async fn test_new_parameter_after_delete_gets_fresh_data() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.auto_worker("w1", 2);

    rt.submit(producer(1, "a"));
    rt.barrier().await.unwrap();
    rt.scheduler.delete_data("a").unwrap();

    rt.submit(producer(2, "a"));
    rt.barrier().await.unwrap();

    let requests = worker.requests();
    assert_ne!(requests[0].parameters[0].output, requests[1].parameters[0].output);
}

#[tokio::test]
async fn test_parameter_origin_overrides_app_host() {
    let rt = Runtime::new(PolicyKind::Fifo);
    rt.auto_worker("w1", 1);

    let origin = taskgraph_core::comm::DataLocation::new("storage", "/archive/x.bin");
    let task = TaskDescription::new(1, "read").with_parameter(Parameter::input("x").with_origin(origin.clone()));
    rt.submit(task);
    rt.barrier().await.unwrap();

    assert_eq!(rt.transfer.copies()[0].1, origin);
}

#[tokio::test]
async fn test_update_keeps_source_while_another_reader_is_pending() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    rt.submit(producer(1, "a"));
    worker.complete_job(only_job(&worker).id);
    let reader = rt.submit(consumer(2, "a"));
    let update = rt.submit(updater(3, "a"));

    // The reader of the first version has not run yet
    assert_eq!(rt.scheduler.action_state(reader), Some(ActionState::Submitted));
    let request = worker
        .requests()
        .into_iter()
        .find(|r| r.action_id == update)
        .unwrap();
    let param = &request.parameters[0];
    assert!(param.input.is_some() && param.output.is_some());
    assert!(param.preserve_source);
}

#[tokio::test]
async fn test_sole_update_may_consume_its_source() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    rt.submit(producer(1, "a"));
    worker.complete_job(only_job(&worker).id);
    let update = rt.submit(updater(2, "a"));
    worker.complete_job(job_of(&worker, update).id);
    rt.barrier().await.unwrap();

    let requests = worker.requests();
    assert!(!requests[1].parameters[0].preserve_source);
}

// ─────────────────────────────────────────────────────────────────
// Waiting on data and groups
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_wait_for_data_follows_last_writer() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    let first = rt.submit(producer(1, "a"));
    let update = rt.submit(updater(2, "a"));
    let other = rt.submit(producer(3, "b"));
    worker.complete_job(job_of(&worker, other).id);

    // Produced or never written data is ready at once
    rt.scheduler.wait_for_data("b").await.unwrap();
    rt.scheduler.wait_for_data("never-written").await.unwrap();

    let mut wait = task::spawn(rt.scheduler.wait_for_data("a"));
    assert_pending!(wait.poll());

    // The update, not the first writer, produces the current version
    worker.complete_job(job_of(&worker, first).id);
    assert_pending!(wait.poll());

    worker.complete_job(job_of(&worker, update).id);
    assert_ready_ok!(wait.poll());
}

#[tokio::test]
async fn test_wait_for_data_of_cancelled_producer_fails() {
    let rt = Runtime::new(PolicyKind::Fifo);
    rt.manual_worker("w1", 1);

    let id = rt.submit(producer(1, "a"));
    let wait = rt.scheduler.wait_for_data("a");
    rt.scheduler.cancel_action(id).unwrap();

    let err = wait.await.unwrap_err();
    assert!(matches!(*err, Error::ExecutionCancelled { action_id } if action_id == id));
}

#[tokio::test]
async fn test_group_barrier_ignores_other_groups() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    let grouped = rt.submit(producer(1, "a").with_group(7));
    let other = rt.submit(producer(2, "b").with_group(8));
    rt.submit(producer(3, "c"));

    let mut group7 = task::spawn(rt.scheduler.barrier_group(7));
    assert_pending!(group7.poll());

    worker.complete_job(job_of(&worker, grouped).id);
    assert_ready_ok!(group7.poll());
    assert_eq!(rt.scheduler.pending_actions(), 2);

    // A group with nothing pending is ready at once
    rt.scheduler.barrier_group(99).await.unwrap();
    rt.scheduler.barrier_group(7).await.unwrap();

    let mut group8 = task::spawn(rt.scheduler.barrier_group(8));
    assert_pending!(group8.poll());
    worker.complete_job(job_of(&worker, other).id);
    assert_ready_ok!(group8.poll());
}

#[tokio::test]
async fn test_group_barrier_reports_member_failure() {
    let rt = Runtime::new(PolicyKind::Fifo);
    let worker = rt.manual_worker("w1", 4);

    let failing = rt.submit(producer(4, "a").with_group(1).on_failure(OnFailure::Fail));
    let healthy = rt.submit(producer(5, "b").with_group(2));

    let mut group1 = task::spawn(rt.scheduler.barrier_group(1));
    worker.fail_job(job_of(&worker, failing).id, JobEndStatus::ExecutionFailed);
    let err = assert_ready_err!(group1.poll());
    assert!(matches!(*err, Error::ExecutionFailed { task_id: Some(4), .. }));

    // Later waits on the failed group still see the failure
    assert!(rt.scheduler.barrier_group(1).await.is_err());

    worker.complete_job(job_of(&worker, healthy).id);
    rt.scheduler.barrier_group(2).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────
// History
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_history_keeps_latest_retired_actions() {
    let mut limited = settings(PolicyKind::Fifo);
    limited.history_limit = 2;
    let rt = Runtime::with_settings(limited, Arc::new(MockTransfer::new()));
    let worker = rt.manual_worker("w1", 4);

    let ids: Vec<ActionId> = (1..=3).map(|i| rt.submit(producer(i, &format!("d{}", i)))).collect();
    for id in &ids {
        worker.complete_job(job_of(&worker, *id).id);
    }
    rt.barrier().await.unwrap();

    assert_eq!(rt.scheduler.action_state(ids[0]), None);
    assert_eq!(rt.scheduler.action_state(ids[1]), Some(ActionState::Completed));
    assert_eq!(rt.scheduler.action_state(ids[2]), Some(ActionState::Completed));
    assert_eq!(rt.scheduler.stats().completed, 3);
}
