//! Per-run mutable state.
//!
//! Exactly one `ExecutionContext` exists per run. It owns the live
//! `WorkflowExecution` record, the run variables and the outputs recorded so
//! far. The executor shares it with the active-run registry through a
//! [`SharedContext`]; the lock is only ever held for synchronous bookkeeping,
//! never across a dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nodes::{log, DispatchContext, LogLevel};

use crate::models::{ExecutionOptions, ExecutionStatus, NodeExecution, Workflow, WorkflowExecution};
use crate::EngineError;

/// Context handle shared between a run and the active-run registry.
pub type SharedContext = Arc<Mutex<ExecutionContext>>;

/// Variable that receives a trigger payload which is not a JSON object.
pub const PAYLOAD_VARIABLE: &str = "payload";

/// Deep copy of the checkpointable part of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub execution: WorkflowExecution,
    pub variables: Map<String, Value>,
    pub node_outputs: HashMap<String, Value>,
}

#[derive(Debug)]
pub struct ExecutionContext {
    execution: WorkflowExecution,
    workflow: Arc<Workflow>,
    options: ExecutionOptions,
    variables: Map<String, Value>,
    node_outputs: HashMap<String, Value>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Create the context (and its `pending` execution record) for a new run.
    ///
    /// Variables are seeded from the trigger payload: each key of an object
    /// payload becomes a variable, any other payload is stored under
    /// [`PAYLOAD_VARIABLE`].
    pub fn new(workflow: Arc<Workflow>, options: ExecutionOptions) -> Self {
        let execution = WorkflowExecution::new(workflow.id, &options);

        let variables = match &options.trigger_payload {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                let mut map = Map::new();
                map.insert(PAYLOAD_VARIABLE.to_owned(), other.clone());
                map
            }
        };

        Self {
            execution,
            workflow,
            options,
            variables,
            node_outputs: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn execution_id(&self) -> Uuid {
        self.execution.id
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_ms)
    }

    pub fn max_retries(&self) -> u32 {
        self.options.max_retries
    }

    // -----------------------------------------------------------------------
    // Variables and node outputs
    // -----------------------------------------------------------------------

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }

    pub fn set_node_output(&mut self, node_id: impl Into<String>, output: Value) {
        self.node_outputs.insert(node_id.into(), output);
    }

    // -----------------------------------------------------------------------
    // Node execution records
    // -----------------------------------------------------------------------

    /// Append a node execution to the run's audit trail.
    pub fn add_node_execution(&mut self, entry: NodeExecution) -> Uuid {
        let id = entry.id;
        self.execution.node_executions.push(entry);
        id
    }

    /// Apply `update` to a node execution that has not finished yet.
    pub fn update_node_execution(
        &mut self,
        id: Uuid,
        update: impl FnOnce(&mut NodeExecution),
    ) -> Result<(), EngineError> {
        let entry = self
            .execution
            .node_executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(EngineError::NodeExecutionNotFound(id))?;

        if entry.status.is_terminal() {
            return Err(EngineError::NodeExecutionFinalized(id));
        }

        update(entry);
        Ok(())
    }

    pub fn node_executions_for(&self, node_id: &str) -> Vec<&NodeExecution> {
        self.execution
            .node_executions
            .iter()
            .filter(|e| e.node_id == node_id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), EngineError> {
        self.execution.transition(next)
    }

    /// Stamp end time and duration and set the run-level error.
    pub fn finish(&mut self, error: Option<String>) {
        self.execution.error = error;
        self.execution.stamp_end();
    }

    /// True once the run has been asked to stop.
    pub fn should_stop(&self) -> bool {
        self.cancellation.is_cancelled() || self.execution.status == ExecutionStatus::Cancelled
    }

    /// Request cancellation. Returns `false` when the run already reached a
    /// terminal state and nothing changed.
    pub fn cancel(&mut self) -> bool {
        if self.execution.transition(ExecutionStatus::Cancelled).is_err() {
            return false;
        }
        self.cancellation.cancel();
        true
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    // -----------------------------------------------------------------------
    // Checkpointing
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            execution: self.execution.clone(),
            variables: self.variables.clone(),
            node_outputs: self.node_outputs.clone(),
        }
    }

    /// Reinstate a snapshot. Cancellation state is not part of a snapshot
    /// and is left untouched.
    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.execution = snapshot.execution;
        self.variables = snapshot.variables;
        self.node_outputs = snapshot.node_outputs;
    }

    // -----------------------------------------------------------------------
    // Observability and dispatch
    // -----------------------------------------------------------------------

    /// Observability hook, tagged with this run's execution id.
    pub fn log(&self, level: LogLevel, message: &str, data: Option<&Value>) {
        log::emit(level, self.execution.id, message, data);
    }

    /// Read-only view of the run handed to a dispatcher.
    pub fn dispatch_context(&self) -> DispatchContext {
        DispatchContext {
            workflow_id: self.workflow.id,
            execution_id: self.execution.id,
            organization_id: self.options.organization_id.clone(),
            user_id: self.options.user_id.clone(),
            dry_run: self.options.dry_run,
            timeout: self.timeout(),
            max_retries: self.options.max_retries,
            attempt: 0,
            variables: self.variables.clone(),
            trigger_payload: self.options.trigger_payload.clone(),
            cancellation: self.cancellation.child_token(),
        }
    }
}
