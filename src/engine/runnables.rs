// src/engine/runnables.rs

//! Active workflow instances, keyed by instance id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::warn;

use crate::engine::event::WorkflowEvent;
use crate::workflow::WorkflowExecutionRunnable;

/// Read by every engine scan and written whenever an instance is created or
/// evicted. `DashMap` allows iteration while other tasks insert or remove.
#[derive(Debug)]
pub struct ActiveRunnableRepository {
    runnables: DashMap<u64, Arc<WorkflowExecutionRunnable>>,
    next_id: AtomicU64,
}

impl Default for ActiveRunnableRepository {
    fn default() -> Self {
        Self {
            runnables: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ActiveRunnableRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_instance_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Ensure freshly allocated ids stay above `id` (used on recovery).
    pub fn observe_instance_id(&self, id: u64) {
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
    }

    pub fn insert(&self, runnable: Arc<WorkflowExecutionRunnable>) {
        self.runnables.insert(runnable.instance_id(), runnable);
    }

    pub fn get(&self, instance_id: u64) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.runnables.get(&instance_id).map(|r| Arc::clone(r.value()))
    }

    pub fn remove(&self, instance_id: u64) -> Option<Arc<WorkflowExecutionRunnable>> {
        self.runnables.remove(&instance_id).map(|(_, r)| r)
    }

    pub fn contains(&self, instance_id: u64) -> bool {
        self.runnables.contains_key(&instance_id)
    }

    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.runnables.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.runnables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runnables.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<WorkflowExecutionRunnable>> {
        self.runnables.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Inbound channel for everything outside the engine: API requests,
    /// executor callbacks. Returns `false` (and drops the event) when the
    /// target instance is gone.
    pub fn store_event_to_tail(&self, event: WorkflowEvent) -> bool {
        match self.get(event.workflow_instance_id) {
            Some(runnable) => {
                runnable.events().store_to_tail(event);
                true
            }
            None => {
                warn!(
                    instance_id = event.workflow_instance_id,
                    event = event.event_type(),
                    "no active workflow instance; event dropped"
                );
                false
            }
        }
    }

    pub fn store_event_to_head(&self, event: WorkflowEvent) -> bool {
        match self.get(event.workflow_instance_id) {
            Some(runnable) => {
                runnable.events().store_to_head(event);
                true
            }
            None => {
                warn!(
                    instance_id = event.workflow_instance_id,
                    event = event.event_type(),
                    "no active workflow instance; event dropped"
                );
                false
            }
        }
    }
}
