//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Creates the execution record and registers the run as active.
//! 2. Validates the graph and computes a topological ordering.
//! 3. Iterates through nodes in order, dispatching each via `NodeDispatcher`.
//! 4. Feeds every node the merged outputs of its upstream nodes.
//! 5. Records a `NodeExecution` per dispatch and applies the per-node
//!    failure policy (`continueOnError`).
//! 6. Stops early on cancellation or when a conditional node's predicate is
//!    false.
//!
//! Every failure is folded into the returned `ExecutionResult`; callers never
//! receive an `Err` from a run.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use nodes::{LogLevel, NodeDispatcher};

use crate::condition::{self, ConditionScope};
use crate::context::{ContextSnapshot, ExecutionContext, SharedContext};
use crate::dispatch::{dispatch_with_retry, resolve_input};
use crate::models::{ExecutionOptions, ExecutionStatus, NodeExecution, Workflow, WorkflowExecution, WorkflowNode};
use crate::planner::{plan_execution, ExecutionPlan};
use crate::registry::ActiveRuns;
use crate::validator::validate_workflow;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    /// Base delay for exponential back-off between retries, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Fail the run when a branch predicate cannot be evaluated, instead of
    /// treating the predicate as false.
    pub fail_on_condition_error: bool,
}

impl ExecutorConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: 100,
            fail_on_condition_error: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Output of a run
// ---------------------------------------------------------------------------

/// The result of running a full workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// `true` exactly when the execution ended `completed`.
    pub success: bool,
    /// The complete audit record, ready to be persisted.
    pub execution: WorkflowExecution,
    pub error: Option<String>,
}

/// Whether the run goes on after a node.
enum Step {
    Continue,
    Halt,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflows and tracks the ones in flight.
///
/// Construct one executor per process (or per tenant) and call
/// [`WorkflowExecutor::execute_workflow`] for each run. Runs may proceed
/// concurrently; each owns a private [`ExecutionContext`].
pub struct WorkflowExecutor {
    dispatcher: Arc<dyn NodeDispatcher>,
    active_runs: Arc<ActiveRuns>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(
        dispatcher: Arc<dyn NodeDispatcher>,
        active_runs: Arc<ActiveRuns>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            dispatcher,
            active_runs,
            config,
        }
    }

    pub fn active_runs(&self) -> &Arc<ActiveRuns> {
        &self.active_runs
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the workflow to completion and return its execution record.
    #[instrument(skip(self, workflow, options), fields(workflow_id = %workflow.id))]
    pub async fn execute_workflow(&self, workflow: &Workflow, options: ExecutionOptions) -> ExecutionResult {
        let workflow = Arc::new(workflow.clone());
        let context = ExecutionContext::new(Arc::clone(&workflow), options);
        let execution_id = context.execution_id();
        let shared: SharedContext = Arc::new(Mutex::new(context));

        // Held until the end of this function, whichever way the run ends.
        let _registration = self.active_runs.register(execution_id, Arc::clone(&shared));

        info!(%execution_id, "execution created");
        let outcome = self.drive(&workflow, &shared).await;

        let execution = {
            let mut ctx = shared.lock();
            conclude(&mut ctx, outcome);
            ctx.execution().clone()
        };

        match execution.status {
            ExecutionStatus::Completed => info!(
                %execution_id,
                nodes = execution.node_executions.len(),
                duration_ms = ?execution.duration_ms,
                "execution completed"
            ),
            ExecutionStatus::Cancelled => warn!(%execution_id, "execution cancelled"),
            status => error!(
                %execution_id,
                %status,
                error = execution.error.as_deref().unwrap_or_default(),
                "execution did not complete"
            ),
        }

        ExecutionResult {
            success: execution.status == ExecutionStatus::Completed,
            error: execution.error.clone(),
            execution,
        }
    }

    /// Ask an active run to stop before its next node.
    ///
    /// Returns `false` if no such run is active or it already finished.
    pub fn cancel_execution(&self, execution_id: Uuid) -> bool {
        let Some(context) = self.active_runs.get(execution_id) else {
            return false;
        };

        let mut ctx = context.lock();
        let cancelled = ctx.cancel();
        if cancelled {
            ctx.log(LogLevel::Warn, "cancellation requested", None);
        }
        cancelled
    }

    /// Live status of an active run; `None` once the run has ended.
    pub fn get_execution_status(&self, execution_id: Uuid) -> Option<ExecutionStatus> {
        self.active_runs
            .get(execution_id)
            .map(|context| context.lock().status())
    }

    /// Checkpoint of an active run.
    pub fn snapshot_execution(&self, execution_id: Uuid) -> Option<ContextSnapshot> {
        self.active_runs
            .get(execution_id)
            .map(|context| context.lock().snapshot())
    }

    pub fn active_executions(&self) -> Vec<Uuid> {
        self.active_runs.ids()
    }

    // -----------------------------------------------------------------------
    // Internal: the orchestration loop.
    // -----------------------------------------------------------------------

    async fn drive(&self, workflow: &Workflow, shared: &SharedContext) -> Result<(), EngineError> {
        validate_workflow(workflow).into_result()?;
        let plan = plan_execution(workflow)?;

        {
            let mut ctx = shared.lock();
            if ctx.status() == ExecutionStatus::Pending {
                ctx.transition(ExecutionStatus::Running)?;
            }
            ctx.log(
                LogLevel::Info,
                "execution started",
                Some(&json!({ "order": plan.order(), "dryRun": ctx.is_dry_run() })),
            );
        }

        for node_id in plan.order() {
            let stop = shared.lock().should_stop();
            if stop {
                info!(node_id = %node_id, "run cancelled; skipping remaining nodes");
                break;
            }

            let Some(node) = workflow.node(node_id) else {
                continue;
            };

            match self.run_node(node, &plan, shared).await? {
                Step::Continue => {}
                Step::Halt => break,
            }
        }

        Ok(())
    }

    /// Dispatch one node and apply its failure and branching policy.
    async fn run_node(
        &self,
        node: &WorkflowNode,
        plan: &ExecutionPlan,
        shared: &SharedContext,
    ) -> Result<Step, EngineError> {
        let (input, entry_id, dispatch_ctx) = {
            let mut ctx = shared.lock();
            let input = resolve_input(&node.id, plan, &ctx);
            let entry = NodeExecution::start(ctx.execution_id(), node, input.clone());
            let entry_id = ctx.add_node_execution(entry);
            (input, entry_id, ctx.dispatch_context())
        };

        let outcome = dispatch_with_retry(
            self.dispatcher.as_ref(),
            node,
            &input,
            dispatch_ctx,
            self.config.retry_base_delay(),
        )
        .await;

        let mut ctx = shared.lock();
        let retry_count = outcome.retry_count;

        let output = match outcome.result {
            Ok(output) => {
                ctx.update_node_execution(entry_id, |e| e.complete(output.clone(), retry_count))?;
                output
            }
            Err(err) => {
                let message = err.message().to_owned();
                ctx.update_node_execution(entry_id, |e| e.fail(message.clone(), retry_count))?;

                if node.continue_on_error() {
                    ctx.log(
                        LogLevel::Warn,
                        &format!("node '{}' failed, continuing: {message}", node.id),
                        None,
                    );
                    return Ok(Step::Continue);
                }

                error!(node_id = %node.id, retries = retry_count, "node failed: {message}");
                return Err(EngineError::NodeDispatch {
                    node_id: node.id.clone(),
                    message,
                });
            }
        };

        info!(node_id = %node.id, retries = retry_count, "node completed");
        ctx.set_node_output(node.id.clone(), output.clone());
        if let Some(variable) = node.output_variable() {
            ctx.set_variable(variable, output.clone());
        }

        if node.is_conditional() && !self.branch_taken(node, &output, &ctx)? {
            ctx.log(
                LogLevel::Info,
                &format!("condition on node '{}' is false; halting run", node.id),
                None,
            );
            return Ok(Step::Halt);
        }

        Ok(Step::Continue)
    }

    /// Evaluate a conditional node's predicate. A node without a predicate
    /// always passes.
    fn branch_taken(
        &self,
        node: &WorkflowNode,
        output: &Value,
        ctx: &ExecutionContext,
    ) -> Result<bool, EngineError> {
        let Some(predicate) = node.condition() else {
            return Ok(true);
        };

        let scope = ConditionScope {
            variables: ctx.variables(),
            output,
            config: &node.configuration,
        };

        match condition::evaluate_value(predicate, &scope) {
            Ok(taken) => Ok(taken),
            Err(err) if self.config.fail_on_condition_error => Err(EngineError::ConditionEvaluation {
                node_id: node.id.clone(),
                message: err.to_string(),
            }),
            Err(err) => {
                warn!(node_id = %node.id, "condition evaluation failed, treating as false: {err}");
                Ok(false)
            }
        }
    }
}

/// Move the run into its final state.
///
/// A run that was cancelled stays cancelled even if the in-flight node then
/// failed; the failure is already on that node's entry.
fn conclude(ctx: &mut ExecutionContext, outcome: Result<(), EngineError>) {
    let status = ctx.status();

    match outcome {
        Ok(()) if status == ExecutionStatus::Cancelled => ctx.finish(None),
        Ok(()) => match ctx.transition(ExecutionStatus::Completed) {
            Ok(()) => ctx.finish(None),
            Err(err) => fail(ctx, err),
        },
        Err(err) if status == ExecutionStatus::Cancelled => {
            warn!(execution_id = %ctx.execution_id(), "error after cancellation: {err}");
            ctx.finish(None);
        }
        Err(err) => fail(ctx, err),
    }
}

fn fail(ctx: &mut ExecutionContext, err: EngineError) {
    // Pending and running runs can always fail.
    if let Err(transition) = ctx.transition(ExecutionStatus::Failed) {
        warn!(execution_id = %ctx.execution_id(), "{transition}");
    }
    ctx.finish(Some(err.to_string()));
}
