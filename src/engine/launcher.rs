// src/engine/launcher.rs

//! Creating workflow instances: fresh triggers and restart recovery.

use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::event::WorkflowEvent;
use crate::engine::operator::OperatorContext;
use crate::errors::Result;
use crate::workflow::{WorkflowDefinition, WorkflowExecutionContext, WorkflowExecutionRunnable};

/// Register a new instance of `definition` and queue its trigger event.
pub fn start_workflow(
    ctx: &OperatorContext,
    definition: &WorkflowDefinition,
) -> Result<Arc<WorkflowExecutionRunnable>> {
    ctx.store.save_definition(definition)?;

    let instance_id = ctx.runnables.next_instance_id();
    let context = WorkflowExecutionContext::new(instance_id, definition);
    let runnable = Arc::new(WorkflowExecutionRunnable::new(context, definition)?);

    ctx.runnables.insert(Arc::clone(&runnable));
    ctx.persist(&runnable)?;
    runnable
        .events()
        .store_to_tail(WorkflowEvent::trigger(instance_id));

    info!(
        instance_id,
        workflow = %definition.name,
        tasks = definition.tasks.len(),
        "workflow instance created"
    );
    Ok(runnable)
}

/// Re-create every instance the store still lists as unfinished and queue a
/// trigger for each. Returns the recovered instance ids.
pub fn recover_unfinished(ctx: &OperatorContext) -> Result<Vec<u64>> {
    let mut recovered = Vec::new();

    for record in ctx.store.unfinished_instances()? {
        let id = record.instance_id;
        if ctx.runnables.contains(id) {
            continue;
        }

        let definition = ctx.store.definition(record.definition_code)?;
        if definition.version != record.definition_version {
            warn!(
                instance_id = id,
                stored = record.definition_version,
                current = definition.version,
                "definition changed since the instance started; recovering with current version"
            );
        }

        let tasks = ctx.store.task_instances(id)?;
        let context = WorkflowExecutionContext::new(id, &definition);
        let runnable = Arc::new(WorkflowExecutionRunnable::recover(context, &definition, &tasks)?);

        ctx.runnables.observe_instance_id(id);
        ctx.runnables.insert(Arc::clone(&runnable));
        runnable.events().store_to_tail(WorkflowEvent::trigger(id));
        recovered.push(id);
    }

    if !recovered.is_empty() {
        info!(count = recovered.len(), "recovered unfinished workflow instances");
    }
    Ok(recovered)
}
