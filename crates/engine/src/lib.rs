//! `engine` crate: workflow models, graph validation, planning, and the execution engine.

pub mod models;
pub mod error;
pub mod validator;
pub mod planner;
pub mod context;
pub mod registry;
pub mod condition;
pub mod dispatch;
pub mod executor;

pub use models::{
    ExecutionOptions, ExecutionStatus, NodeCategory, NodeExecution, NodeExecutionStatus, Trigger,
    Workflow, WorkflowEdge, WorkflowExecution, WorkflowNode,
};
pub use error::EngineError;
pub use validator::{validate_workflow, ValidationReport};
pub use planner::{plan_execution, ExecutionPlan};
pub use context::{ContextSnapshot, ExecutionContext};
pub use registry::ActiveRuns;
pub use executor::{ExecutionResult, ExecutorConfig, WorkflowExecutor};
