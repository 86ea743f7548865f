//! Core domain models for the workflow engine.
//!
//! `Workflow` is the immutable input to a run; `WorkflowExecution` and its
//! nested `NodeExecution` entries are the audit record a run produces. All of
//! them serialise to camelCase JSON so the execution sink can store them
//! verbatim.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use nodes::{NodeCategory, WorkflowNode};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a run was started. Recorded on the execution for audit only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Triggered manually by an operator.
    #[default]
    Manual,
    /// Triggered by an incoming HTTP request to `/webhook/{path}`.
    Webhook {
        /// URL path segment that identifies this workflow.
        path: String,
    },
    /// Triggered on a cron schedule.
    Cron {
        /// Standard cron expression (5 fields).
        expression: String,
    },
    /// Triggered by an event from another system.
    Event { source: String },
}

// ---------------------------------------------------------------------------
// WorkflowEdge
// ---------------------------------------------------------------------------

/// Directed dependency and data-flow link from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl WorkflowEdge {
    /// Edge with an id derived from its endpoints.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let (source, target) = (source.into(), target.into());
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            edges,
            metadata: Map::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow execution.
///
/// `pending → running → {completed | failed | cancelled}`. A pending run may
/// also fail (bad graph) or be cancelled before it starts. Terminal states
/// are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Failed | Cancelled) | (Running, Completed | Failed | Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Lifecycle of a single node dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl NodeExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for NodeExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}

// ---------------------------------------------------------------------------
// NodeExecution
// ---------------------------------------------------------------------------

/// Audit record of one node dispatch inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    pub id: Uuid,
    /// Owning run, by id only.
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_name: String,
    pub status: NodeExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl NodeExecution {
    /// A `running` entry for a node that is about to be dispatched.
    pub fn start(execution_id: Uuid, node: &WorkflowNode, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            status: NodeExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            input,
            output: None,
            error: None,
            retry_count: 0,
        }
    }

    pub fn complete(&mut self, output: Value, retry_count: u32) {
        self.output = Some(output);
        self.finish(NodeExecutionStatus::Completed, retry_count);
    }

    pub fn fail(&mut self, error: impl Into<String>, retry_count: u32) {
        self.error = Some(error.into());
        self.finish(NodeExecutionStatus::Failed, retry_count);
    }

    fn finish(&mut self, status: NodeExecutionStatus, retry_count: u32) {
        let end = Utc::now();
        self.status = status;
        self.retry_count = retry_count;
        self.end_time = Some(end);
        self.duration_ms = Some(elapsed_ms(self.start_time, end));
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One runtime instance of a workflow, carrying the full audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub trigger: Trigger,
    pub trigger_payload: Option<Value>,
    /// Node dispatches in the order they happened.
    pub node_executions: Vec<NodeExecution>,
    pub error: Option<String>,
    pub organization_id: String,
    pub user_id: Option<String>,
}

impl WorkflowExecution {
    /// A fresh `pending` execution stamped with the current time.
    pub fn new(workflow_id: Uuid, options: &ExecutionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            trigger: options.trigger.clone(),
            trigger_payload: options.trigger_payload.clone(),
            node_executions: Vec::new(),
            error: None,
            organization_id: options.organization_id.clone(),
            user_id: options.user_id.clone(),
        }
    }

    /// Move to `next`, enforcing the lifecycle.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record the end time and duration of the run.
    pub fn stamp_end(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.duration_ms = Some(elapsed_ms(self.start_time, end));
    }

    pub fn node_execution(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|n| n.node_id == node_id)
    }
}

// ---------------------------------------------------------------------------
// ExecutionOptions
// ---------------------------------------------------------------------------

pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Per-run options supplied by whoever triggers the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Organization the run is attributed to. Attribution only, never authorization.
    pub organization_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub trigger_payload: Option<Value>,
    #[serde(default)]
    pub dry_run: bool,
    /// Advisory run budget handed to dispatchers; not enforced by the engine.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries allowed per node for retryable dispatch failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ExecutionOptions {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: None,
            trigger: Trigger::Manual,
            trigger_payload: None,
            dry_run: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.trigger_payload = Some(payload);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}
