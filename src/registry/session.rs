// src/registry/session.rs

//! Registry connection state as seen by this node.
//!
//! While the connection is suspended the monitor skips its sweeps: every
//! peer would look missing for reasons that have nothing to do with the
//! peer. Each restored connection is broadcast so heartbeat tasks can
//! republish their ephemeral keys right away instead of waiting for the
//! next interval.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::registry::{ConnectionListener, ConnectionState};

pub struct SessionWatch {
    suspended: AtomicBool,
    lost: AtomicU64,
    reconnects: watch::Sender<u64>,
}

impl Default for SessionWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionWatch {
    pub fn new() -> Self {
        let (reconnects, _) = watch::channel(0);
        Self {
            suspended: AtomicBool::new(false),
            lost: AtomicU64::new(0),
            reconnects,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Sessions lost so far; each loss dropped our ephemeral keys.
    pub fn lost_sessions(&self) -> u64 {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn reconnections(&self) -> u64 {
        *self.reconnects.borrow()
    }

    /// Changes once per restored connection.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.reconnects.subscribe()
    }
}

impl ConnectionListener for SessionWatch {
    fn on_state_change(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                self.suspended.store(false, Ordering::SeqCst);
            }
            ConnectionState::Suspended => {
                self.suspended.store(true, Ordering::SeqCst);
                warn!("registry connection suspended; liveness sweeps paused");
            }
            ConnectionState::Disconnected => {
                self.suspended.store(true, Ordering::SeqCst);
                let lost = self.lost.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(lost, "registry session lost; ephemeral keys must be republished");
            }
            ConnectionState::Reconnected => {
                self.suspended.store(false, Ordering::SeqCst);
                self.reconnects.send_modify(|n| *n += 1);
                info!(reconnects = self.reconnections(), "registry connection restored");
            }
        }
    }
}
