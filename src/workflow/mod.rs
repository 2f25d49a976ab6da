// src/workflow/mod.rs

//! Workflow definitions and the per-instance state machines.

pub mod context;
pub mod definition;
pub mod runnable;
pub mod state;
pub mod step;
pub mod task;

pub use context::WorkflowExecutionContext;
pub use definition::{TaskDefinition, TaskKind, TaskRelation, WorkflowDefinition};
pub use runnable::WorkflowExecutionRunnable;
pub use state::{ControlKind, ControlOutcome, ControlRequest, TaskOutcome, TaskState, WorkflowState};
pub use step::{RunnableCommand, RunnableStep};
pub use task::TaskExecutionRunnable;
