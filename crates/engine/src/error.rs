//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::models::ExecutionStatus;

/// Errors produced by the workflow engine (validation, planning, execution).
///
/// None of these ever escape `WorkflowExecutor::execute_workflow`; they are
/// turned into a failed `WorkflowExecution` whose `error` is the `Display`
/// text of the variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ------ Validation / planning errors ------

    /// The graph is structurally invalid. Holds every validator message
    /// joined with `"; "`, displayed as-is.
    #[error("{0}")]
    Validation(String),

    /// Planning produced an empty order for a non-empty graph.
    #[error("no executable nodes: every node is part of a dependency cycle")]
    NoExecutableNodes,

    /// Planning could order some nodes but the rest wait on a cycle.
    #[error("workflow graph contains a cycle involving: {}", unresolved.join(", "))]
    CycleDetected { unresolved: Vec<String> },

    // ------ Execution errors ------

    /// A node's dispatcher failed and the node does not continue on error.
    /// Displays as the node's own error message.
    #[error("{message}")]
    NodeDispatch { node_id: String, message: String },

    /// A branch predicate could not be evaluated (only surfaced when the
    /// executor is configured to fail on predicate errors).
    #[error("condition on node '{node_id}' could not be evaluated: {message}")]
    ConditionEvaluation { node_id: String, message: String },

    // ------ Record keeping errors ------

    #[error("invalid execution status transition from {from} to {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("node execution {0} not found")]
    NodeExecutionNotFound(Uuid),

    /// Terminal node executions are immutable.
    #[error("node execution {0} is already finished")]
    NodeExecutionFinalized(Uuid),
}
