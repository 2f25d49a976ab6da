// src/registry/monitor.rs

//! Peer liveness judgement.
//!
//! A peer is dead when its heartbeat has been missing for longer than one
//! interval, or when its last report is older than
//! `interval * dead_after_missed`.
//!
//! With a [`SessionWatch`] attached, sweeps are skipped while the registry
//! connection is suspended, and every restored connection restarts the
//! missing timers of all peers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::dispatch::Host;
use crate::errors::RegistryError;
use crate::registry::{
    HeartBeat, Registry, SessionWatch, WORKER_ROOT, dead_path, worker_group_path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerHealth {
    Alive,
    /// Missing, but not for longer than one interval yet.
    Missing,
    Dead,
}

#[derive(Debug, Default)]
struct MonitorState {
    missing_since: HashMap<String, DateTime<Utc>>,
    /// Worker paths seen alive, so a vanished key is still checked.
    known: BTreeMap<String, Host>,
    reconnects_seen: u64,
}

pub struct HeartbeatMonitor {
    registry: Arc<dyn Registry>,
    interval: Duration,
    dead_after_missed: u32,
    session: Option<Arc<SessionWatch>>,
    state: Mutex<MonitorState>,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<dyn Registry>, interval: Duration, dead_after_missed: u32) -> Self {
        Self {
            registry,
            interval,
            dead_after_missed: dead_after_missed.max(1),
            session: None,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn with_session(mut self, session: Arc<SessionWatch>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn max_age(&self) -> Duration {
        self.interval * self.dead_after_missed
    }

    /// Judge a single registry path at `now`.
    pub fn judge(&self, path: &str, now: DateTime<Utc>) -> Result<PeerHealth, RegistryError> {
        let raw = self.registry.get(path)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(raw) = raw else {
            let since = *state.missing_since.entry(path.to_string()).or_insert(now);
            let gone_for = (now - since).to_std().unwrap_or(Duration::ZERO);
            return Ok(if gone_for > self.interval {
                PeerHealth::Dead
            } else {
                PeerHealth::Missing
            });
        };

        state.missing_since.remove(path);
        let beat = HeartBeat::decode(path, &raw)?;
        if beat.is_stale(now, self.max_age()) {
            Ok(PeerHealth::Dead)
        } else {
            Ok(PeerHealth::Alive)
        }
    }

    /// Write the dead marker for `path`. The owning node sees it on its next
    /// heartbeat tick and stops.
    pub fn mark_dead(&self, path: &str, now: DateTime<Utc>) -> Result<(), RegistryError> {
        warn!(path, "marking node dead");
        self.registry.put(&dead_path(path), &now.to_rfc3339(), false)?;
        self.registry.delete(path)
    }

    /// Check every registered or previously seen worker. Returns the hosts
    /// newly judged dead; each one gets a dead marker.
    pub fn sweep_workers(&self, now: DateTime<Utc>) -> Result<Vec<Host>, RegistryError> {
        if let Some(session) = &self.session {
            if session.is_suspended() {
                debug!("registry connection suspended; sweep skipped");
                return Ok(Vec::new());
            }
        }

        let mut candidates: BTreeMap<String, Host> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(session) = &self.session {
                let reconnects = session.reconnections();
                if reconnects != state.reconnects_seen {
                    debug!(
                        missing = state.missing_since.len(),
                        "connection restored; missing timers restarted"
                    );
                    state.missing_since.clear();
                    state.reconnects_seen = reconnects;
                }
            }
            state.known.clone()
        };

        for group in self.registry.children(WORKER_ROOT)? {
            let group_path = worker_group_path(&group);
            for addr in self.registry.children(&group_path)? {
                match addr.parse::<Host>() {
                    Ok(host) => {
                        candidates.insert(format!("{group_path}/{addr}"), host);
                    }
                    Err(err) => debug!(path = %group_path, addr, error = %err, "skipping odd registry child"),
                }
            }
        }

        let mut dead = Vec::new();
        for (path, host) in candidates {
            if self.registry.exists(&dead_path(&path))? {
                self.forget(&path);
                continue;
            }

            let health = match self.judge(&path, now) {
                Ok(health) => health,
                Err(RegistryError::Codec { message, .. }) => {
                    warn!(path = %path, error = %message, "unreadable heartbeat");
                    continue;
                }
                Err(err) => return Err(err),
            };

            match health {
                PeerHealth::Alive => {
                    self.state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .known
                        .insert(path, host);
                }
                PeerHealth::Missing => {}
                PeerHealth::Dead => {
                    self.mark_dead(&path, now)?;
                    self.forget(&path);
                    dead.push(host);
                }
            }
        }

        Ok(dead)
    }

    fn forget(&self, path: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.known.remove(path);
        state.missing_since.remove(path);
    }
}
