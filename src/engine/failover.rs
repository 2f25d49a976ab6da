// src/engine/failover.rs

//! What happens to in-flight tasks when their worker is declared dead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::dispatch::Host;
use crate::engine::event::WorkflowEvent;
use crate::engine::runnables::ActiveRunnableRepository;
use crate::registry::HeartbeatMonitor;
use crate::types::FailoverPolicy;
use crate::workflow::TaskOutcome;

/// Apply `policy` to every task dispatched to one of `dead`. Returns the
/// number of tasks failed.
pub fn handle_dead_hosts(
    runnables: &ActiveRunnableRepository,
    dead: &[Host],
    policy: FailoverPolicy,
) -> usize {
    if dead.is_empty() {
        return 0;
    }

    if policy == FailoverPolicy::AwaitRecovery {
        info!(hosts = ?dead, "workers dead; in-flight tasks left to await recovery");
        return 0;
    }

    let mut failed = 0;
    for runnable in runnables.snapshot() {
        let id = runnable.instance_id();
        for host in dead {
            for (task, attempt) in runnable.in_flight_on_host(host) {
                warn!(instance_id = id, task = %task, attempt, host = %host, "failing task on dead worker");
                runnable.events().store_to_tail(WorkflowEvent::task_result(
                    id,
                    task,
                    attempt,
                    TaskOutcome::Failed(format!("worker {host} is dead")),
                ));
                failed += 1;
            }
        }
    }
    failed
}

/// Sweep workers every `interval` and fail over the dead ones until shutdown.
pub async fn run_failover_loop(
    monitor: Arc<HeartbeatMonitor>,
    runnables: Arc<ActiveRunnableRepository>,
    policy: FailoverPolicy,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match monitor.sweep_workers(Utc::now()) {
                    Ok(dead) => {
                        handle_dead_hosts(&runnables, &dead, policy);
                    }
                    Err(err) => error!(error = %err, "worker sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
