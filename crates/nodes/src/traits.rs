//! The `NodeDispatcher` trait: the contract every node implementation must fulfil.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::log::{self, LogLevel};
use crate::{NodeError, WorkflowNode};

/// Read-only view of the running execution passed to every dispatch.
///
/// The engine builds a fresh one per attempt; mutating it has no effect on
/// the run.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// ID of the workflow being run.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// Organization the run is attributed to.
    pub organization_id: String,
    /// User who started the run, when known.
    pub user_id: Option<String>,
    /// Dispatchers must not perform external side effects when set.
    pub dry_run: bool,
    /// Time budget for the whole run. Advisory: the engine never preempts a
    /// dispatch, so a dispatcher that needs a hard limit enforces it itself.
    pub timeout: Duration,
    pub max_retries: u32,
    /// Zero-based attempt number of this dispatch.
    pub attempt: u32,
    /// Run variables at the moment of dispatch.
    pub variables: Map<String, Value>,
    /// Payload the run was triggered with.
    pub trigger_payload: Option<Value>,
    /// Cancelled when the run is cancelled; long-running dispatchers may
    /// select on it to stop early.
    pub cancellation: CancellationToken,
}

impl DispatchContext {
    /// A context with default limits, useful for calling dispatchers outside
    /// of an engine run.
    pub fn new(workflow_id: Uuid, execution_id: Uuid, organization_id: impl Into<String>) -> Self {
        Self {
            workflow_id,
            execution_id,
            organization_id: organization_id.into(),
            user_id: None,
            dry_run: false,
            timeout: Duration::from_millis(300_000),
            max_retries: 3,
            attempt: 0,
            variables: Map::new(),
            trigger_payload: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Observability hook, tagged with this run's execution id.
    pub fn log(&self, level: LogLevel, message: &str, data: Option<&Value>) {
        log::emit(level, self.execution_id, message, data);
    }
}

/// The core dispatch trait.
///
/// Given a node and its resolved input, perform the node's effect and return
/// its output. Implementations may take arbitrary wall-clock time and may
/// retry internally; the engine awaits each call to completion before moving
/// on to the next node.
#[async_trait]
pub trait NodeDispatcher: Send + Sync {
    async fn execute(
        &self,
        node: &WorkflowNode,
        input: Value,
        ctx: &DispatchContext,
    ) -> Result<Value, NodeError>;
}
