// src/workflow/context.rs

use chrono::{DateTime, Utc};

use crate::workflow::definition::WorkflowDefinition;

/// Identity of one running workflow instance.
///
/// Immutable once built; other components only read it to correlate logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowExecutionContext {
    instance_id: u64,
    name: String,
    definition_code: u64,
    definition_version: u32,
    started_at: DateTime<Utc>,
}

impl WorkflowExecutionContext {
    pub fn new(instance_id: u64, definition: &WorkflowDefinition) -> Self {
        Self {
            instance_id,
            name: format!("{}-{}", definition.name, instance_id),
            definition_code: definition.code,
            definition_version: definition.version,
            started_at: Utc::now(),
        }
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition_code(&self) -> u64 {
        self.definition_code
    }

    pub fn definition_version(&self) -> u32 {
        self.definition_version
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
