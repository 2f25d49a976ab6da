// tests/engine_workflow.rs

mod common;

use std::time::Duration;

use dagmaster::engine::{EngineOptions, WorkflowEvent};
use dagmaster::errors::MasterError;
use dagmaster::store::MetadataStore;
use dagmaster::types::FailureStrategy;
use dagmaster::workflow::{
    ControlKind, ControlOutcome, ControlRequest, TaskOutcome, TaskState, WorkflowState,
};
use dagmaster_test_utils::builders::{TaskDefinitionBuilder, WorkflowDefinitionBuilder};
use dagmaster_test_utils::harness::{Harness, register_worker};
use tokio::sync::watch;

use common::{TestResult, wait_until, with_timeout};

fn fan_in() -> WorkflowDefinitionBuilder {
    // A -> C, B -> C
    WorkflowDefinitionBuilder::new("fan-in")
        .shell("A")
        .shell("B")
        .shell("C")
        .edge("A", "C")
        .edge("B", "C")
}

#[tokio::test]
async fn fan_in_workflow_runs_to_success() -> TestResult {
    common::init_tracing();
    let h = Harness::new();
    let wf = h.start(&fan_in().build());
    let id = wf.instance_id();
    assert_eq!(wf.state(), WorkflowState::Created);

    assert_eq!(h.fire(id).await, 1);
    assert_eq!(wf.state(), WorkflowState::Running);
    assert_eq!(wf.task_state("A"), Some(TaskState::Dispatched));
    assert_eq!(wf.task_state("B"), Some(TaskState::Dispatched));
    assert_eq!(wf.task_state("C"), None);

    wait_until(|| h.executor.dispatched().len() == 2).await;
    assert!(
        h.executor
            .dispatched()
            .iter()
            .all(|r| r.host.as_ref() == Some(&h.worker))
    );

    h.ack(id, "A");
    h.report(id, "A", TaskOutcome::Success);
    assert_eq!(h.fire(id).await, 2);
    assert_eq!(wf.task_state("A"), Some(TaskState::Success));
    assert_eq!(wf.task_state("C"), None, "C still waits for B");

    h.report(id, "B", TaskOutcome::Success);
    h.fire(id).await;
    assert_eq!(wf.task_state("C"), Some(TaskState::Dispatched));

    h.report(id, "C", TaskOutcome::Success);
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Success);

    // Terminal, drained and persisted: evicted in the same pass.
    assert!(!h.runnables.contains(id));
    assert_eq!(h.alerts.alerts(), vec![(id, WorkflowState::Success)]);

    let record = h.store.workflow_instance(id)?;
    assert_eq!(record.state, WorkflowState::Success);
    let tasks = h.store.task_instances(id)?;
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.state == TaskState::Success));
    Ok(())
}

#[tokio::test]
async fn events_for_evicted_instances_are_dropped() -> TestResult {
    let h = Harness::new();
    let wf = h.start(&WorkflowDefinitionBuilder::new("one").shell("A").build());
    let id = wf.instance_id();

    h.fire(id).await;
    h.report(id, "A", TaskOutcome::Success);
    h.fire(id).await;
    assert!(!h.runnables.contains(id));

    assert!(!h.runnables.store_event_to_tail(WorkflowEvent::task_result(
        id,
        "A",
        1,
        TaskOutcome::Failed("late".to_string()),
    )));
    h.engine
        .context()
        .handle_event(WorkflowEvent::kill(id))?;
    assert_eq!(wf.state(), WorkflowState::Success);
    Ok(())
}

#[tokio::test]
async fn first_failure_ends_the_workflow() -> TestResult {
    let h = Harness::new();
    let wf = h.start(&fan_in().failure_strategy(FailureStrategy::End).build());
    let id = wf.instance_id();
    h.fire(id).await;

    h.report(id, "A", TaskOutcome::Failed("exit code 1".to_string()));
    h.fire(id).await;

    // B is still running and gets a kill request; nothing new is dispatched.
    assert_eq!(wf.state(), WorkflowState::Running);
    assert_eq!(wf.task_state("A"), Some(TaskState::Failed));
    assert_eq!(
        wf.control_request("B"),
        Some(ControlRequest {
            kind: ControlKind::Kill,
            outcome: ControlOutcome::Accepted,
        })
    );
    wait_until(|| h.executor.killed_tasks() == vec!["B".to_string()]).await;

    h.report(id, "B", TaskOutcome::Killed);
    h.fire(id).await;

    assert_eq!(wf.state(), WorkflowState::Failed);
    assert_eq!(wf.task_state("B"), Some(TaskState::Killed));
    assert_eq!(wf.task_state("C"), None);
    assert!(wf.failure_reason().unwrap().contains("task 'A' failed"));
    assert_eq!(h.alerts.alerts(), vec![(id, WorkflowState::Failed)]);
    Ok(())
}

#[tokio::test]
async fn continue_strategy_finishes_independent_branches() -> TestResult {
    let h = Harness::new();
    // A -> C, B -> D
    let def = WorkflowDefinitionBuilder::new("branches")
        .shell("A")
        .shell("B")
        .shell("C")
        .shell("D")
        .edge("A", "C")
        .edge("B", "D")
        .failure_strategy(FailureStrategy::Continue)
        .build();
    let wf = h.start(&def);
    let id = wf.instance_id();
    h.fire(id).await;

    h.report(id, "A", TaskOutcome::Failed("boom".to_string()));
    h.report(id, "B", TaskOutcome::Success);
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Running);
    assert_eq!(wf.task_state("D"), Some(TaskState::Dispatched));
    assert!(h.executor.killed_tasks().is_empty());

    h.report(id, "D", TaskOutcome::Success);
    h.fire(id).await;

    assert_eq!(wf.state(), WorkflowState::Failed);
    assert_eq!(wf.task_state("C"), None);
    assert_eq!(wf.failure_reason().as_deref(), Some("task 'A' failed: boom"));
    Ok(())
}

#[tokio::test]
async fn failed_task_is_retried_after_its_interval() -> TestResult {
    let h = Harness::new();
    let def = WorkflowDefinitionBuilder::new("retry")
        .task(
            TaskDefinitionBuilder::new("A")
                .retries(2, Duration::from_millis(10))
                .build(),
        )
        .build();
    let wf = h.start(&def);
    let id = wf.instance_id();
    h.fire(id).await;

    h.report(id, "A", TaskOutcome::Failed("flaky".to_string()));
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Running);
    assert_eq!(wf.task_state("A"), Some(TaskState::Created));
    assert_eq!(wf.task("A").unwrap().retry_times(), 1);

    wait_until(|| !wf.events().is_empty()).await;
    h.fire(id).await;
    assert_eq!(wf.task_state("A"), Some(TaskState::Dispatched));

    wait_until(|| h.executor.dispatched().len() == 2).await;
    assert_eq!(h.executor.dispatched()[1].retry_times, 1);

    h.report(id, "A", TaskOutcome::Success);
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Success);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_fail_the_task() -> TestResult {
    let h = Harness::new();
    let def = WorkflowDefinitionBuilder::new("retry")
        .task(
            TaskDefinitionBuilder::new("A")
                .retries(1, Duration::from_millis(5))
                .build(),
        )
        .build();
    let wf = h.start(&def);
    let id = wf.instance_id();
    h.fire(id).await;

    h.report(id, "A", TaskOutcome::Failed("first".to_string()));
    h.fire(id).await;
    wait_until(|| !wf.events().is_empty()).await;
    h.fire(id).await;

    h.report(id, "A", TaskOutcome::Failed("second".to_string()));
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Failed);
    assert_eq!(wf.task("A").unwrap().failure(), Some("second"));
    Ok(())
}

#[tokio::test]
async fn task_without_host_is_parked_until_a_worker_appears() -> TestResult {
    let h = Harness::new();
    let def = WorkflowDefinitionBuilder::new("gpu")
        .task(TaskDefinitionBuilder::new("A").worker_group("gpu").build())
        .build();
    let wf = h.start(&def);
    let id = wf.instance_id();

    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Running);
    assert_eq!(wf.task_state("A"), Some(TaskState::Created));

    // Still nobody in the group: parked again.
    wait_until(|| !wf.events().is_empty()).await;
    h.fire(id).await;
    assert_eq!(wf.task_state("A"), Some(TaskState::Created));

    let gpu = dagmaster::dispatch::Host::new("10.0.0.50", 1234);
    register_worker(h.registry.as_ref(), "gpu", &gpu);
    wait_until(|| !wf.events().is_empty()).await;
    h.fire(id).await;

    assert_eq!(wf.task_state("A"), Some(TaskState::Dispatched));
    assert_eq!(wf.task("A").unwrap().host(), Some(&gpu));
    wait_until(|| h.executor.dispatched().len() == 1).await;
    Ok(())
}

#[tokio::test]
async fn head_events_fire_before_tail_events() -> TestResult {
    let h = Harness::new();
    let def = WorkflowDefinitionBuilder::new("chain")
        .shell("A")
        .shell("B")
        .edge("A", "B")
        .build();
    let wf = h.start(&def);
    let id = wf.instance_id();
    h.fire(id).await;

    h.report(id, "A", TaskOutcome::Success);
    assert!(h.runnables.store_event_to_head(WorkflowEvent::kill(id)));
    assert_eq!(h.fire(id).await, 2);

    // The kill was applied first, so B never became runnable.
    assert_eq!(wf.state(), WorkflowState::Stopped);
    assert_eq!(wf.task_state("A"), Some(TaskState::Success));
    assert_eq!(wf.task_state("B"), None);
    Ok(())
}

#[tokio::test]
async fn rejected_event_fails_the_workflow() -> TestResult {
    let h = Harness::new();
    let wf = h.start(&WorkflowDefinitionBuilder::new("one").shell("A").build());
    let id = wf.instance_id();
    h.fire(id).await;

    h.ack(id, "nope");
    h.fire(id).await;
    assert_eq!(
        wf.control_request("A").map(|c| c.kind),
        Some(ControlKind::Kill)
    );

    h.report(id, "A", TaskOutcome::Killed);
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Failed);
    assert!(wf.failure_reason().unwrap().contains("no task 'nope'"));
    Ok(())
}

#[tokio::test]
async fn executor_rejection_becomes_a_task_failure() -> TestResult {
    let h = Harness::new();
    h.executor.fail_dispatch(true);
    let wf = h.start(&WorkflowDefinitionBuilder::new("one").shell("A").build());
    let id = wf.instance_id();
    h.fire(id).await;

    wait_until(|| !wf.events().is_empty()).await;
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Failed);
    assert!(wf.failure_reason().unwrap().contains("injected failure"));
    Ok(())
}

#[tokio::test]
async fn logic_tasks_stay_on_the_master() -> TestResult {
    let h = Harness::new();
    let def = WorkflowDefinitionBuilder::new("logic")
        .task(TaskDefinitionBuilder::new("S").task_type("SWITCH").build())
        .build();
    let wf = h.start(&def);
    let id = wf.instance_id();
    h.fire(id).await;

    wait_until(|| h.executor.dispatched().len() == 1).await;
    assert_eq!(h.executor.dispatched()[0].host, Some(h.master.clone()));
    assert_eq!(wf.task("S").unwrap().host(), Some(&h.master));
    Ok(())
}

#[tokio::test]
async fn pause_and_resume_through_the_engine() -> TestResult {
    let h = Harness::new();
    let def = WorkflowDefinitionBuilder::new("chain")
        .shell("A")
        .shell("B")
        .edge("A", "B")
        .build();
    let wf = h.start(&def);
    let id = wf.instance_id();
    h.fire(id).await;

    assert!(h.runnables.store_event_to_tail(WorkflowEvent::pause(id)));
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Pausing);
    wait_until(|| h.executor.paused_tasks() == vec!["A".to_string()]).await;

    h.report(id, "A", TaskOutcome::Paused);
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Paused);
    assert!(h.runnables.contains(id), "paused instances stay active");

    assert!(h.runnables.store_event_to_tail(WorkflowEvent::trigger(id)));
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Running);
    assert_eq!(wf.task_state("A"), Some(TaskState::Dispatched));

    h.report(id, "A", TaskOutcome::Success);
    h.fire(id).await;
    h.report(id, "B", TaskOutcome::Success);
    h.fire(id).await;
    assert_eq!(wf.state(), WorkflowState::Success);
    Ok(())
}

#[tokio::test]
async fn engine_loop_drives_instances_without_manual_firing() -> TestResult {
    let h = Harness::with_options(
        EngineOptions {
            scan_interval: Duration::from_millis(5),
            ..EngineOptions::default()
        },
        Duration::from_millis(20),
    );
    let wf = h.start(&WorkflowDefinitionBuilder::new("one").shell("A").build());
    let id = wf.instance_id();
    let Harness { engine, executor, runnables, .. } = h;

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(engine.run(rx));

    wait_until(|| executor.dispatched().len() == 1).await;
    let attempt = executor.dispatched()[0].attempt;
    runnables.store_event_to_tail(WorkflowEvent::task_result(id, "A", attempt, TaskOutcome::Success));
    wait_until(|| !runnables.contains(id)).await;
    assert_eq!(wf.state(), WorkflowState::Success);

    tx.send(true)?;
    with_timeout(handle).await??;
    Ok(())
}

#[tokio::test]
async fn store_outage_halts_the_engine() -> TestResult {
    let h = Harness::with_options(
        EngineOptions {
            scan_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            max_consecutive_faults: 3,
        },
        Duration::from_millis(20),
    );
    let wf = h.start(&WorkflowDefinitionBuilder::new("one").shell("A").build());
    h.store.set_available(false);

    let Harness { engine, .. } = h;
    let (_tx, rx) = watch::channel(false);
    let outcome = with_timeout(engine.run(rx)).await;

    match outcome {
        Err(MasterError::EngineHalted(n)) => assert_eq!(n, 3),
        other => panic!("expected EngineHalted, got {other:?}"),
    }
    assert_eq!(wf.state(), WorkflowState::Running);
    Ok(())
}

#[tokio::test]
async fn at_most_one_firing_pass_per_instance() -> TestResult {
    let h = Harness::new();
    let wf = h.start(&WorkflowDefinitionBuilder::new("one").shell("A").build());
    let id = wf.instance_id();

    // The spawned pass cannot run before this task yields, so the marker
    // is still held for the following calls.
    assert_eq!(h.engine.scan_once(), 1);
    assert!(h.engine.is_in_flight(id));
    assert_eq!(h.engine.scan_once(), 0);
    assert_eq!(h.engine.fire_instance(id).await?, 0);
    assert_eq!(wf.state(), WorkflowState::Created);

    wait_until(|| !h.engine.is_in_flight(id)).await;
    assert_eq!(wf.state(), WorkflowState::Running);
    wait_until(|| h.executor.dispatched().len() == 1).await;

    // Nothing queued any more: no new pass.
    assert_eq!(h.engine.scan_once(), 0);
    Ok(())
}

#[tokio::test]
async fn in_flight_marker_is_released_after_a_faulted_pass() -> TestResult {
    let h = Harness::new();
    let wf = h.start(&WorkflowDefinitionBuilder::new("one").shell("A").build());
    let id = wf.instance_id();
    h.store.set_available(false);

    assert!(matches!(
        h.engine.fire_instance(id).await,
        Err(MasterError::Store(_))
    ));
    assert!(!h.engine.is_in_flight(id));

    // Same through the scanner: the spawned pass faults and lets go.
    h.runnables.store_event_to_tail(WorkflowEvent::pause(id));
    assert_eq!(h.engine.scan_once(), 1);
    wait_until(|| !h.engine.is_in_flight(id)).await;

    h.store.set_available(true);
    assert!(h.engine.fire_instance(id).await.is_ok());
    assert!(!h.engine.is_in_flight(id));
    Ok(())
}
