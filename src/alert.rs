// src/alert.rs

//! Alerting boundary.

use tracing::{info, warn};

use crate::workflow::WorkflowState;

/// Fire-and-forget notification on terminal workflow states.
pub trait AlertSender: Send + Sync {
    fn notify(&self, instance_id: u64, outcome: WorkflowState);
}

/// Writes alerts to the log; the default when no channel is configured.
#[derive(Debug, Default)]
pub struct LogAlertSender;

impl AlertSender for LogAlertSender {
    fn notify(&self, instance_id: u64, outcome: WorkflowState) {
        match outcome {
            WorkflowState::Success => info!(instance_id, %outcome, "workflow finished"),
            _ => warn!(instance_id, %outcome, "workflow finished"),
        }
    }
}
