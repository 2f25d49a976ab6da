// src/engine/repository.rs

//! Per-instance event queue.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::event::WorkflowEvent;

/// FIFO queue of events for one workflow instance, with a head-insert for
/// events that must be processed before anything already queued.
pub trait EventRepository: Send + Sync + Debug {
    fn store_to_tail(&self, event: WorkflowEvent);

    fn store_to_head(&self, event: WorkflowEvent);

    /// Non-blocking; `None` when the queue is empty.
    fn poll(&self) -> Option<WorkflowEvent>;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    queue: Mutex<VecDeque<WorkflowEvent>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<WorkflowEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventRepository for InMemoryEventRepository {
    fn store_to_tail(&self, event: WorkflowEvent) {
        self.queue().push_back(event);
    }

    fn store_to_head(&self, event: WorkflowEvent) {
        self.queue().push_front(event);
    }

    fn poll(&self) -> Option<WorkflowEvent> {
        self.queue().pop_front()
    }

    fn size(&self) -> usize {
        self.queue().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_on_empty_queue_returns_none_repeatedly() {
        let repo = InMemoryEventRepository::new();
        for _ in 0..3 {
            assert!(repo.poll().is_none());
        }
        assert_eq!(repo.size(), 0);
    }

    #[test]
    fn head_insert_overtakes_tail() {
        let repo = InMemoryEventRepository::new();
        repo.store_to_tail(WorkflowEvent::trigger(1));
        repo.store_to_tail(WorkflowEvent::pause(1));
        repo.store_to_head(WorkflowEvent::kill(1));

        assert_eq!(repo.poll(), Some(WorkflowEvent::kill(1)));
        assert_eq!(repo.poll(), Some(WorkflowEvent::trigger(1)));
        assert_eq!(repo.poll(), Some(WorkflowEvent::pause(1)));
        assert!(repo.is_empty());
    }
}
