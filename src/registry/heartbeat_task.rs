// src/registry/heartbeat_task.rs

//! Periodic self-registration of one node.
//!
//! [`HeartbeatTask::register`] clears dead markers left over from an
//! earlier run of the same node and publishes the first heartbeat. After
//! that, each tick first checks whether a monitor declared any of this
//! node's paths dead; if so the node stops. Otherwise it republishes its heartbeat
//! on every path. Consecutive failed ticks are counted, and once the count
//! reaches the threshold the task stops instead of limping along half
//! registered. A restored registry connection triggers an extra tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::errors::RegistryError;
use crate::registry::{HeartbeatSource, Registry, SessionWatch, dead_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A monitor wrote a dead marker for one of our paths.
    MarkedDead,
    TooManyFailures,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    Published,
    Failed { consecutive: u32 },
    Stop(StopReason),
}

pub struct HeartbeatTask {
    registry: Arc<dyn Registry>,
    source: Arc<dyn HeartbeatSource>,
    paths: Vec<String>,
    interval: Duration,
    max_failures: u32,
    consecutive_failures: u32,
    reconnects: Option<watch::Receiver<u64>>,
}

impl HeartbeatTask {
    pub fn new(
        registry: Arc<dyn Registry>,
        source: Arc<dyn HeartbeatSource>,
        paths: Vec<String>,
        interval: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            registry,
            source,
            paths,
            interval,
            max_failures: max_failures.max(1),
            consecutive_failures: 0,
            reconnects: None,
        }
    }

    /// Republish as soon as `session` reports a restored connection.
    pub fn with_session(mut self, session: &SessionWatch) -> Self {
        self.reconnects = Some(session.subscribe());
        self
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Startup registration. Dead markers for our paths predate this run
    /// and are removed; markers written later stop the task on a tick.
    pub fn register(&mut self) -> Result<(), RegistryError> {
        for path in &self.paths {
            let marker = dead_path(path);
            if self.registry.exists(&marker)? {
                info!(path = %path, "clearing dead marker from a previous run");
                self.registry.delete(&marker)?;
            }
        }
        self.publish()?;
        Ok(())
    }

    /// One heartbeat round.
    pub fn tick(&mut self) -> HeartbeatTick {
        match self.publish() {
            Ok(true) => {
                if self.consecutive_failures > 0 {
                    info!(
                        after = self.consecutive_failures,
                        "heartbeat recovered"
                    );
                }
                self.consecutive_failures = 0;
                HeartbeatTick::Published
            }
            Ok(false) => {
                error!(paths = ?self.paths, "node was marked dead by a monitor; stopping");
                HeartbeatTick::Stop(StopReason::MarkedDead)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    consecutive = self.consecutive_failures,
                    threshold = self.max_failures,
                    error = %err,
                    "heartbeat failed"
                );
                if self.consecutive_failures >= self.max_failures {
                    error!(
                        consecutive = self.consecutive_failures,
                        "heartbeat failure threshold reached; stopping"
                    );
                    HeartbeatTick::Stop(StopReason::TooManyFailures)
                } else {
                    HeartbeatTick::Failed {
                        consecutive: self.consecutive_failures,
                    }
                }
            }
        }
    }

    /// `Ok(false)` when one of our paths carries a dead marker.
    fn publish(&self) -> Result<bool, RegistryError> {
        for path in &self.paths {
            if self.registry.exists(&dead_path(path))? {
                return Ok(false);
            }
        }

        let beat = self.source.heartbeat();
        let payload = beat.encode()?;
        for path in &self.paths {
            self.registry.put(path, &payload, true)?;
        }
        debug!(sequence = beat.sequence, paths = self.paths.len(), "heartbeat published");
        Ok(true)
    }

    /// Tick every `interval` until stopped. On a requested shutdown the
    /// node's paths are removed; on any other stop they are left to expire.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> StopReason {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut reconnects = self.reconnects.take();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let HeartbeatTick::Stop(reason) = self.tick() {
                        return reason;
                    }
                }
                restored = next_reconnect(&mut reconnects) => {
                    if !restored {
                        reconnects = None;
                        continue;
                    }
                    info!(paths = ?self.paths, "registry connection restored; republishing");
                    if let HeartbeatTick::Stop(reason) = self.tick() {
                        return reason;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for path in &self.paths {
            if let Err(err) = self.registry.delete(path) {
                debug!(path = %path, error = %err, "could not remove heartbeat path on shutdown");
            }
        }
        info!("heartbeat task stopped");
        StopReason::Shutdown
    }
}

async fn next_reconnect(reconnects: &mut Option<watch::Receiver<u64>>) -> bool {
    match reconnects {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
