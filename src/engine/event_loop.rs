// src/engine/event_loop.rs

//! Global event loop.
//!
//! Every scan enumerates the active runnables and spawns one firing pass per
//! instance that has queued events. An in-flight marker guarantees at most
//! one pass per instance at a time, so an instance's state transitions are
//! applied by a single writer. Infrastructure faults raised by a pass are
//! reported back to the loop, which backs off and eventually gives up.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::engine::operator::OperatorContext;
use crate::engine::runnables::ActiveRunnableRepository;
use crate::errors::{MasterError, Result};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub scan_interval: Duration,
    pub error_backoff: Duration,
    /// Consecutive failed scans after which [`EventEngine::run`] gives up.
    pub max_consecutive_faults: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            max_consecutive_faults: 10,
        }
    }
}

/// Removes the in-flight marker when the pass ends, whether it returned,
/// failed or panicked.
struct InFlightGuard {
    set: Arc<DashSet<u64>>,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

pub struct EventEngine {
    ctx: Arc<OperatorContext>,
    options: EngineOptions,
    in_flight: Arc<DashSet<u64>>,
    faults_tx: mpsc::UnboundedSender<MasterError>,
    faults_rx: mpsc::UnboundedReceiver<MasterError>,
}

impl EventEngine {
    pub fn new(ctx: Arc<OperatorContext>, options: EngineOptions) -> Self {
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            options,
            in_flight: Arc::new(DashSet::new()),
            faults_tx,
            faults_rx,
        }
    }

    pub fn context(&self) -> &Arc<OperatorContext> {
        &self.ctx
    }

    pub fn runnables(&self) -> &Arc<ActiveRunnableRepository> {
        &self.ctx.runnables
    }

    pub fn is_in_flight(&self, instance_id: u64) -> bool {
        self.in_flight.contains(&instance_id)
    }

    /// Spawn a firing pass for every instance that has work and is not
    /// already in flight. Returns how many passes were spawned.
    pub fn scan_once(&self) -> usize {
        let mut spawned = 0;

        for runnable in self.ctx.runnables.snapshot() {
            let id = runnable.instance_id();
            let has_work = !runnable.events().is_empty()
                || runnable.is_terminal()
                || self.ctx.needs_persist(id);
            if !has_work {
                continue;
            }

            let Some(guard) = self.mark_in_flight(id) else {
                debug!(instance_id = id, "firing pass still running; skipped this scan");
                continue;
            };

            let ctx = Arc::clone(&self.ctx);
            let faults = self.faults_tx.clone();
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(err) = fire_pass(&ctx, id) {
                    let _ = faults.send(err);
                }
            });
            spawned += 1;
        }

        spawned
    }

    /// Run one firing pass for `instance_id` on the current task. Returns the
    /// number of events fired, or `Ok(0)` when a pass is already running.
    pub async fn fire_instance(&self, instance_id: u64) -> Result<usize> {
        let Some(_guard) = self.mark_in_flight(instance_id) else {
            return Ok(0);
        };
        fire_pass(&self.ctx, instance_id)
    }

    /// Scan until `shutdown` flips to `true`. Returns an error once
    /// `max_consecutive_faults` scans in a row saw an infrastructure fault.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            scan_interval_ms = self.options.scan_interval.as_millis() as u64,
            "event engine started"
        );
        let mut consecutive = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.scan_once();

            let mut faulted = false;
            while let Ok(err) = self.faults_rx.try_recv() {
                error!(error = %err, "infrastructure fault during firing pass");
                faulted = true;
            }

            let pause = if faulted {
                consecutive += 1;
                if consecutive >= self.options.max_consecutive_faults {
                    error!(consecutive, "too many consecutive faults; stopping event engine");
                    return Err(MasterError::EngineHalted(consecutive));
                }
                warn!(
                    consecutive,
                    backoff_ms = self.options.error_backoff.as_millis() as u64,
                    "backing off after failed scan"
                );
                self.options.error_backoff
            } else {
                consecutive = 0;
                self.options.scan_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("event engine stopped");
        Ok(())
    }

    fn mark_in_flight(&self, id: u64) -> Option<InFlightGuard> {
        if self.in_flight.insert(id) {
            Some(InFlightGuard {
                set: Arc::clone(&self.in_flight),
                id,
            })
        } else {
            None
        }
    }
}

/// Drain and fire all queued events of one instance, FIFO. Stops at the
/// first infrastructure fault. Evicts the instance once it is terminal, its
/// queue is empty and its state is persisted.
fn fire_pass(ctx: &OperatorContext, instance_id: u64) -> Result<usize> {
    let Some(runnable) = ctx.runnables.get(instance_id) else {
        return Ok(0);
    };

    if ctx.needs_persist(instance_id) {
        ctx.persist(&runnable)?;
    }

    let mut fired = 0;
    while let Some(event) = runnable.events().poll() {
        fired += 1;
        debug!(instance_id, event = event.event_type(), "firing event");
        if let Err(err) = ctx.handle_event(event) {
            if err.is_infrastructure() {
                return Err(err);
            }
            warn!(instance_id, error = %err, "event handling failed");
        }
    }

    if runnable.is_terminal() && runnable.events().is_empty() && !ctx.needs_persist(instance_id)
    {
        ctx.runnables.remove(instance_id);
        info!(instance_id, state = %runnable.state(), "workflow instance evicted");
    }

    Ok(fired)
}
