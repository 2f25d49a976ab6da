use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use dagmaster::alert::AlertSender;
use dagmaster::errors::ExecutorError;
use dagmaster::exec::{ControlTarget, DispatchRequest, ExecFuture, TaskExecutor};
use dagmaster::workflow::WorkflowState;

/// A fake executor that records every request and never reports back on
/// its own. Tests drive completion by storing events themselves.
#[derive(Default)]
pub struct RecordingExecutor {
    dispatched: Mutex<Vec<DispatchRequest>>,
    paused: Mutex<Vec<ControlTarget>>,
    killed: Mutex<Vec<ControlTarget>>,
    fail_dispatch: AtomicBool,
    fail_control: AtomicBool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `dispatch` return an error.
    pub fn fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    /// Make every following `pause`/`kill` return an error.
    pub fn fail_control(&self, fail: bool) {
        self.fail_control.store(fail, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatched_tasks(&self) -> Vec<String> {
        self.dispatched().into_iter().map(|r| r.task).collect()
    }

    pub fn paused_tasks(&self) -> Vec<String> {
        self.paused.lock().unwrap().iter().map(|t| t.task.clone()).collect()
    }

    pub fn killed_tasks(&self) -> Vec<String> {
        self.killed.lock().unwrap().iter().map(|t| t.task.clone()).collect()
    }
}

impl TaskExecutor for RecordingExecutor {
    fn dispatch(&self, request: DispatchRequest) -> ExecFuture<'_> {
        Box::pin(async move {
            if self.fail_dispatch.load(Ordering::SeqCst) {
                return Err(ExecutorError::DispatchFailed {
                    task: request.task,
                    message: "injected failure".to_string(),
                });
            }
            self.dispatched.lock().unwrap().push(request);
            Ok(())
        })
    }

    fn pause(&self, target: ControlTarget) -> ExecFuture<'_> {
        Box::pin(async move {
            if self.fail_control.load(Ordering::SeqCst) {
                return Err(ExecutorError::PauseFailed {
                    task: target.task,
                    message: "injected failure".to_string(),
                });
            }
            self.paused.lock().unwrap().push(target);
            Ok(())
        })
    }

    fn kill(&self, target: ControlTarget) -> ExecFuture<'_> {
        Box::pin(async move {
            if self.fail_control.load(Ordering::SeqCst) {
                return Err(ExecutorError::KillFailed {
                    task: target.task,
                    message: "injected failure".to_string(),
                });
            }
            self.killed.lock().unwrap().push(target);
            Ok(())
        })
    }
}

/// Collects `(instance_id, outcome)` pairs.
#[derive(Default)]
pub struct RecordingAlertSender {
    alerts: Mutex<Vec<(u64, WorkflowState)>>,
}

impl RecordingAlertSender {
    pub fn alerts(&self) -> Vec<(u64, WorkflowState)> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertSender for RecordingAlertSender {
    fn notify(&self, instance_id: u64, outcome: WorkflowState) {
        self.alerts.lock().unwrap().push((instance_id, outcome));
    }
}
