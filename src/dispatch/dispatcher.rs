// src/dispatch/dispatcher.rs

//! Decides where a dispatch-ready task runs and which executor gets it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::dispatch::Host;
use crate::dispatch::selector::Selector;
use crate::errors::DispatchError;
use crate::exec::{DispatchRequest, TaskExecutor};
use crate::registry::HostDiscovery;
use crate::workflow::TaskKind;

/// Executor and host chosen for one task attempt.
#[derive(Clone)]
pub struct Route {
    pub executor: Arc<dyn TaskExecutor>,
    pub host: Host,
}

pub struct TaskDispatcher {
    discovery: HostDiscovery,
    selector: Box<dyn Selector>,
    logic: Arc<dyn TaskExecutor>,
    physical: Arc<dyn TaskExecutor>,
    master: Host,
}

impl TaskDispatcher {
    pub fn new(
        discovery: HostDiscovery,
        selector: Box<dyn Selector>,
        logic: Arc<dyn TaskExecutor>,
        physical: Arc<dyn TaskExecutor>,
        master: Host,
    ) -> Self {
        Self {
            discovery,
            selector,
            logic,
            physical,
            master,
        }
    }

    pub fn executor_for(&self, kind: TaskKind) -> Arc<dyn TaskExecutor> {
        match kind {
            TaskKind::Logic => Arc::clone(&self.logic),
            TaskKind::Physical => Arc::clone(&self.physical),
        }
    }

    pub fn route(&self, request: &DispatchRequest) -> Result<Route, DispatchError> {
        self.route_at(request, Utc::now())
    }

    /// Logic tasks stay on the master. Physical tasks get a worker of their
    /// group, selected from the current registry snapshot.
    pub fn route_at(
        &self,
        request: &DispatchRequest,
        now: DateTime<Utc>,
    ) -> Result<Route, DispatchError> {
        if request.kind == TaskKind::Logic {
            return Ok(Route {
                executor: Arc::clone(&self.logic),
                host: self.master.clone(),
            });
        }

        let candidates = self.discovery.workers(&request.worker_group, now)?;
        if candidates.is_empty() {
            return Err(DispatchError::NoHostAvailable(request.worker_group.clone()));
        }

        let picked = self
            .selector
            .select(&candidates)?
            .ok_or_else(|| DispatchError::NoHostAvailable(request.worker_group.clone()))?;

        debug!(
            instance_id = request.workflow_instance_id,
            task = %request.task,
            host = %picked.host,
            candidates = candidates.len(),
            "host selected"
        );

        Ok(Route {
            executor: Arc::clone(&self.physical),
            host: picked.host,
        })
    }

    /// Route and hand the task to its executor in one go.
    pub async fn dispatch(&self, mut request: DispatchRequest) -> Result<Host, DispatchError> {
        let route = self.route(&request)?;
        request.host = Some(route.host.clone());

        info!(
            instance_id = request.workflow_instance_id,
            task = %request.task,
            host = %route.host,
            "dispatching task"
        );
        route.executor.dispatch(request).await?;
        Ok(route.host)
    }
}
