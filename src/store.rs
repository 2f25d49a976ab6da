// src/store.rs

//! Metadata store boundary: definitions in, instance history out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::workflow::{TaskState, WorkflowDefinition, WorkflowState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceRecord {
    pub instance_id: u64,
    pub name: String,
    pub definition_code: u64,
    pub definition_version: u32,
    pub state: WorkflowState,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstanceRecord {
    pub instance_id: u64,
    pub task: String,
    pub task_type: String,
    pub state: TaskState,
    /// `ip:port` of the executing host, if one was assigned.
    pub host: Option<String>,
    pub retry_times: u32,
    pub updated_at: DateTime<Utc>,
}

pub trait MetadataStore: Send + Sync {
    fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError>;

    fn definition(&self, code: u64) -> Result<WorkflowDefinition, StoreError>;

    fn save_workflow_instance(&self, record: &WorkflowInstanceRecord) -> Result<(), StoreError>;

    /// Upsert by `(instance_id, task)`.
    fn save_task_instances(&self, records: &[TaskInstanceRecord]) -> Result<(), StoreError>;

    fn workflow_instance(&self, instance_id: u64) -> Result<WorkflowInstanceRecord, StoreError>;

    fn task_instances(&self, instance_id: u64) -> Result<Vec<TaskInstanceRecord>, StoreError>;

    /// Instances whose last persisted state is not terminal.
    fn unfinished_instances(&self) -> Result<Vec<WorkflowInstanceRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    definitions: BTreeMap<u64, WorkflowDefinition>,
    workflows: BTreeMap<u64, WorkflowInstanceRecord>,
    tasks: BTreeMap<(u64, String), TaskInstanceRecord>,
}

/// Process-local store. `set_available(false)` makes every call fail with
/// `Unavailable`, which is how tests exercise the infrastructure-fault path.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(self.tables.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
        self.tables()?
            .definitions
            .insert(definition.code, definition.clone());
        Ok(())
    }

    fn definition(&self, code: u64) -> Result<WorkflowDefinition, StoreError> {
        self.tables()?
            .definitions
            .get(&code)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow definition {code}")))
    }

    fn save_workflow_instance(&self, record: &WorkflowInstanceRecord) -> Result<(), StoreError> {
        self.tables()?
            .workflows
            .insert(record.instance_id, record.clone());
        Ok(())
    }

    fn save_task_instances(&self, records: &[TaskInstanceRecord]) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        for record in records {
            tables
                .tasks
                .insert((record.instance_id, record.task.clone()), record.clone());
        }
        Ok(())
    }

    fn workflow_instance(&self, instance_id: u64) -> Result<WorkflowInstanceRecord, StoreError> {
        self.tables()?
            .workflows
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow instance {instance_id}")))
    }

    fn task_instances(&self, instance_id: u64) -> Result<Vec<TaskInstanceRecord>, StoreError> {
        Ok(self
            .tables()?
            .tasks
            .range((instance_id, String::new())..)
            .take_while(|((id, _), _)| *id == instance_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn unfinished_instances(&self) -> Result<Vec<WorkflowInstanceRecord>, StoreError> {
        Ok(self
            .tables()?
            .workflows
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect())
    }
}
