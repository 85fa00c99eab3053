//! Common test utilities and fixtures
//!
//! Builds a scheduler wired to mock transfers and mock resources.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use taskgraph_core::action::{Parameter, TaskDescription};
use taskgraph_core::comm::{LogicalDataRegistry, MockTransfer};
use taskgraph_core::config::{PolicyKind, SchedulerSettings, TransferSettings};
use taskgraph_core::data::DataInfoProvider;
use taskgraph_core::error::Error;
use taskgraph_core::ids::{ActionId, RuntimeIds};
use taskgraph_core::resource::{MockResource, MockResourceConfig, ResourceRequirements};
use taskgraph_core::scheduler::TaskScheduler;

/// Host the application data lives on in tests
pub const APP_HOST: &str = "app";

/// Scheduler plus the mocks behind it
pub struct Runtime {
    pub scheduler: Arc<TaskScheduler>,
    pub transfer: Arc<MockTransfer>,
}

impl Runtime {
    pub fn new(policy: PolicyKind) -> Self {
        Self::with_transfer(policy, Arc::new(MockTransfer::new()))
    }

    pub fn with_transfer(policy: PolicyKind, transfer: Arc<MockTransfer>) -> Self {
        Self::with_settings(settings(policy), transfer)
    }

    pub fn with_settings(settings: SchedulerSettings, transfer: Arc<MockTransfer>) -> Self {
        let ids = RuntimeIds::shared();
        let ledger = Arc::new(DataInfoProvider::with_timestamp(ids.clone(), 0));
        let registry = LogicalDataRegistry::new(transfer.clone(), &TransferSettings::default());
        Self {
            scheduler: TaskScheduler::new(settings, ids, ledger, registry),
            transfer,
        }
    }

    /// Add a worker whose jobs finish only when the test says so
    pub fn manual_worker(&self, name: &str, cores: u32) -> Arc<MockResource> {
        let config = MockResourceConfig {
            working_dir: format!("/scratch/{}", name),
            auto_complete: false,
            ..Default::default()
        };
        self.add_worker(name, cores, config)
    }

    /// Add a worker completing every job on its own
    pub fn auto_worker(&self, name: &str, cores: u32) -> Arc<MockResource> {
        let config = MockResourceConfig {
            working_dir: format!("/scratch/{}", name),
            execution_ms: 5,
            ..Default::default()
        };
        self.add_worker(name, cores, config)
    }

    pub fn add_worker(&self, name: &str, cores: u32, config: MockResourceConfig) -> Arc<MockResource> {
        let worker = Arc::new(MockResource::with_config(
            name,
            ResourceRequirements::new(cores),
            self.scheduler.registry().clone(),
            config,
        ));
        self.scheduler
            .add_resource(worker.clone())
            .expect("add worker");
        worker
    }

    pub fn submit(&self, task: TaskDescription) -> ActionId {
        self.scheduler.submit_task(task).expect("submit task")
    }

    /// Wait for the barrier, failing the test if it hangs
    pub async fn barrier(&self) -> Result<(), Arc<Error>> {
        tokio::time::timeout(Duration::from_secs(5), self.scheduler.barrier())
            .await
            .expect("barrier timed out")
    }
}

/// Scheduler settings used by [`Runtime::new`]
pub fn settings(policy: PolicyKind) -> SchedulerSettings {
    SchedulerSettings {
        policy,
        max_retries: 2,
        app_host: APP_HOST.to_string(),
        history_limit: 1000,
    }
}

/// Task writing `data`
pub fn producer(task_id: u64, data: &str) -> TaskDescription {
    TaskDescription::new(task_id, format!("produce_{}", data)).with_parameter(Parameter::output(data))
}

/// Task reading `data`
pub fn consumer(task_id: u64, data: &str) -> TaskDescription {
    TaskDescription::new(task_id, format!("consume_{}", data)).with_parameter(Parameter::input(data))
}

/// Task updating `data` in place
pub fn updater(task_id: u64, data: &str) -> TaskDescription {
    TaskDescription::new(task_id, format!("update_{}", data)).with_parameter(Parameter::inout(data))
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
