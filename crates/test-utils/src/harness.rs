use std::sync::Arc;
use std::time::Duration;

use dagmaster::dispatch::{Host, RoundRobinSelector, TaskDispatcher};
use dagmaster::engine::{
    ActiveRunnableRepository, EngineOptions, EventEngine, OperatorContext, WorkflowEvent,
    start_workflow,
};
use dagmaster::registry::{
    HeartbeatSource, HostDiscovery, InMemoryRegistry, NodeHeartbeatSource, Registry, worker_path,
};
use dagmaster::store::InMemoryMetadataStore;
use dagmaster::workflow::{TaskOutcome, WorkflowDefinition, WorkflowExecutionRunnable};

use crate::fake_executor::{RecordingAlertSender, RecordingExecutor};

/// Publish one heartbeat for `host` in `group`, as a worker would.
pub fn register_worker(registry: &dyn Registry, group: &str, host: &Host) {
    let beat = NodeHeartbeatSource::new(host.clone(), group).heartbeat();
    registry
        .put(&worker_path(group, host), &beat.encode().unwrap(), true)
        .unwrap();
}

/// Fully wired engine with in-memory collaborators and a recording
/// executor behind both the logic and the physical route.
pub struct Harness {
    pub registry: Arc<InMemoryRegistry>,
    pub runnables: Arc<ActiveRunnableRepository>,
    pub store: Arc<InMemoryMetadataStore>,
    pub executor: Arc<RecordingExecutor>,
    pub alerts: Arc<RecordingAlertSender>,
    pub engine: EventEngine,
    pub master: Host,
    pub worker: Host,
}

impl Harness {
    /// One worker registered in group `default`; no-host retries after 20ms.
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default(), Duration::from_millis(20))
    }

    pub fn with_options(options: EngineOptions, no_host_retry_interval: Duration) -> Self {
        Self::build(
            options,
            no_host_retry_interval,
            Arc::new(InMemoryMetadataStore::new()),
        )
    }

    /// A fresh master (new registry, repository and executor) on top of the
    /// same metadata store, as after a process restart.
    pub fn restarted(&self) -> Self {
        Self::build(
            EngineOptions::default(),
            Duration::from_millis(20),
            self.store.clone(),
        )
    }

    fn build(
        options: EngineOptions,
        no_host_retry_interval: Duration,
        store: Arc<InMemoryMetadataStore>,
    ) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let runnables = Arc::new(ActiveRunnableRepository::new());
        let executor = Arc::new(RecordingExecutor::new());
        let alerts = Arc::new(RecordingAlertSender::default());
        let master = Host::new("10.0.0.1", 5678);
        let worker = Host::new("10.0.0.2", 1234);

        register_worker(registry.as_ref(), "default", &worker);

        let dispatcher = TaskDispatcher::new(
            HostDiscovery::new(registry.clone(), Duration::from_secs(60)),
            Box::new(RoundRobinSelector::new()),
            executor.clone(),
            executor.clone(),
            master.clone(),
        );
        let ctx = OperatorContext::new(
            runnables.clone(),
            Arc::new(dispatcher),
            store.clone(),
            alerts.clone(),
            no_host_retry_interval,
        );
        let engine = EventEngine::new(Arc::new(ctx), options);

        Self {
            registry,
            runnables,
            store,
            executor,
            alerts,
            engine,
            master,
            worker,
        }
    }

    pub fn start(&self, definition: &WorkflowDefinition) -> Arc<WorkflowExecutionRunnable> {
        start_workflow(self.engine.context(), definition).expect("workflow should start")
    }

    /// Run one firing pass for `instance_id` inline.
    pub async fn fire(&self, instance_id: u64) -> usize {
        self.engine
            .fire_instance(instance_id)
            .await
            .expect("firing pass should not fault")
    }

    /// Attempt currently dispatched for `task`, as an executor would echo it.
    pub fn attempt(&self, instance_id: u64, task: &str) -> u32 {
        self.runnables
            .get(instance_id)
            .and_then(|wf| wf.task(task))
            .map_or(0, |t| t.attempt())
    }

    pub fn ack(&self, instance_id: u64, task: &str) {
        let attempt = self.attempt(instance_id, task);
        assert!(self.runnables.store_event_to_tail(WorkflowEvent::task_ack(
            instance_id,
            task,
            attempt,
            self.worker.clone(),
        )));
    }

    /// Report `outcome` for the current attempt of `task`.
    pub fn report(&self, instance_id: u64, task: &str, outcome: TaskOutcome) {
        let attempt = self.attempt(instance_id, task);
        self.report_attempt(instance_id, task, attempt, outcome);
    }

    pub fn report_attempt(&self, instance_id: u64, task: &str, attempt: u32, outcome: TaskOutcome) {
        assert!(self.runnables.store_event_to_tail(WorkflowEvent::task_result(
            instance_id,
            task,
            attempt,
            outcome,
        )));
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
