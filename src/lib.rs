// src/lib.rs

pub mod alert;
pub mod cli;
pub mod config;
pub mod dag;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod store;
pub mod types;
pub mod workflow;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::alert::LogAlertSender;
use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::dispatch::{Host, TaskDispatcher, selector_for};
use crate::engine::{
    ActiveRunnableRepository, EventEngine, OperatorContext, run_failover_loop, start_workflow,
};
use crate::exec::{InProcessLogicExecutor, LocalCommandExecutor};
use crate::registry::{
    HeartbeatMonitor, HeartbeatTask, HostDiscovery, InMemoryRegistry, NodeHeartbeatSource,
    Registry, SessionWatch, StopReason, master_path, worker_path,
};
use crate::store::{InMemoryMetadataStore, MetadataStore};
use crate::workflow::WorkflowState;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - registry, master heartbeat and an embedded local worker
/// - dispatcher, operators and the event engine
/// - failover sweeps
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let registry: Arc<dyn Registry> = Arc::new(InMemoryRegistry::new());
    let session = Arc::new(SessionWatch::new());
    registry.add_connection_listener(session.clone());
    let runnables = Arc::new(ActiveRunnableRepository::new());
    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());

    let master = cfg.master.host.clone();
    let group = cfg.master.worker_group.clone();
    let worker_host = Host::new(master.ip.clone(), master.port.wrapping_add(1));

    let worker = Arc::new(LocalCommandExecutor::new(
        worker_host.clone(),
        Arc::clone(&runnables),
    ));
    let logic = Arc::new(InProcessLogicExecutor::new(
        master.clone(),
        Arc::clone(&runnables),
    ));

    // Heartbeats: the master itself plus the embedded worker.
    let mut master_beat = HeartbeatTask::new(
        Arc::clone(&registry),
        Arc::new(NodeHeartbeatSource::new(master.clone(), group.clone())),
        vec![master_path(&master)],
        cfg.heartbeat.interval,
        cfg.heartbeat.max_failures,
    )
    .with_session(&session);
    let load = Arc::clone(&worker);
    let mut worker_beat = HeartbeatTask::new(
        Arc::clone(&registry),
        Arc::new(
            NodeHeartbeatSource::new(worker_host.clone(), group.clone())
                .with_running_tasks(move || load.running_count()),
        ),
        vec![worker_path(&group, &worker_host)],
        cfg.heartbeat.interval,
        cfg.heartbeat.max_failures,
    )
    .with_session(&session);
    // Both nodes are registered before the first dispatch looks for them.
    master_beat.register()?;
    worker_beat.register()?;

    let mut background = vec![
        spawn_heartbeat("master", master_beat, &shutdown_rx, &shutdown_tx),
        spawn_heartbeat("worker", worker_beat, &shutdown_rx, &shutdown_tx),
    ];

    let monitor = Arc::new(
        HeartbeatMonitor::new(
            Arc::clone(&registry),
            cfg.heartbeat.interval,
            cfg.heartbeat.dead_after_missed,
        )
        .with_session(session),
    );
    background.push(tokio::spawn(run_failover_loop(
        monitor,
        Arc::clone(&runnables),
        cfg.heartbeat.failover_policy,
        cfg.heartbeat.interval,
        shutdown_rx.clone(),
    )));

    let dispatcher = Arc::new(TaskDispatcher::new(
        HostDiscovery::new(Arc::clone(&registry), cfg.heartbeat.max_age()),
        selector_for(
            cfg.dispatch.selector,
            cfg.dispatch.factors,
            cfg.dispatch.warm_up,
        ),
        logic,
        worker,
        master.clone(),
    ));

    let ctx = Arc::new(OperatorContext::new(
        Arc::clone(&runnables),
        dispatcher,
        Arc::clone(&store),
        Arc::new(LogAlertSender),
        cfg.dispatch.no_host_retry_interval,
    ));

    // The in-memory store starts empty, so there is nothing to recover.
    let instance = start_workflow(&ctx, &cfg.workflow)?;
    let instance_id = instance.instance_id();
    drop(instance);

    // Ctrl-C -> graceful shutdown.
    {
        let tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("shutdown requested");
            let _ = tx.send(true);
        });
    }

    if args.once {
        let tx = Arc::clone(&shutdown_tx);
        let runnables = Arc::clone(&runnables);
        let poll = cfg.engine.scan_interval;
        tokio::spawn(async move {
            while runnables.contains(instance_id) {
                tokio::time::sleep(poll).await;
            }
            debug!(instance_id, "workflow instance evicted; exiting (--once)");
            let _ = tx.send(true);
        });
    }

    let engine = EventEngine::new(ctx, cfg.engine);
    let outcome = engine.run(shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    for handle in background {
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
    outcome?;

    if args.once {
        let record = store.workflow_instance(instance_id)?;
        if record.state != WorkflowState::Success {
            anyhow::bail!(
                "workflow instance {instance_id} finished {}{}",
                record.state,
                record
                    .failure_reason
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}

/// Run a heartbeat task; a self-stop (marked dead, too many failures) takes
/// the whole process down.
fn spawn_heartbeat(
    role: &'static str,
    task: HeartbeatTask,
    shutdown_rx: &watch::Receiver<bool>,
    shutdown_tx: &Arc<watch::Sender<bool>>,
) -> tokio::task::JoinHandle<()> {
    let rx = shutdown_rx.clone();
    let tx = Arc::clone(shutdown_tx);
    tokio::spawn(async move {
        let reason = task.run(rx).await;
        if reason != StopReason::Shutdown {
            error!(role, ?reason, "heartbeat stopped; shutting down");
            let _ = tx.send(true);
        }
    })
}

/// Print the task graph without executing anything.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    let wf = &cfg.workflow;
    let graph = wf.build_graph()?;

    println!("dagmaster dry-run");
    println!("  workflow = {} (code {}, v{})", wf.name, wf.code, wf.version);
    println!("  failure_strategy = {:?}", wf.failure_strategy);
    println!("  selector = {:?}", cfg.dispatch.selector);
    println!();

    println!("order: {}", graph.topological_sort()?.join(" -> "));
    println!("begin: {:?}", graph.begin_nodes());
    println!("end:   {:?}", graph.end_nodes());
    println!();

    println!("tasks ({}):", wf.tasks.len());
    for task in &wf.tasks {
        println!("  - {} [{} / {:?}]", task.code, task.task_type, task.kind());
        if !task.command.is_empty() {
            println!("      command: {}", task.command);
        }
        let after = graph.previous_nodes(&task.code);
        if !after.is_empty() {
            println!("      after: {after:?}");
        }
        println!("      worker_group: {}", task.worker_group);
        if task.max_retries > 0 {
            println!(
                "      retries: {} every {:?}",
                task.max_retries, task.retry_interval
            );
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
