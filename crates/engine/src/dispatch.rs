//! Engine side of the dispatcher boundary: input resolution and dispatch
//! with retry.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::warn;

use nodes::{DispatchContext, NodeDispatcher, NodeError, WorkflowNode};

use crate::context::ExecutionContext;
use crate::planner::ExecutionPlan;

/// Build the input for `node_id`.
///
/// - A node with no incoming edges receives the trigger payload, or `{}`
///   when there is none (a `null` payload counts as none).
/// - Otherwise each upstream output is merged in plan order: object outputs
///   key-by-key (last writer wins), any other output under the source id.
///   Upstream nodes with no recorded output contribute nothing.
pub fn resolve_input(node_id: &str, plan: &ExecutionPlan, ctx: &ExecutionContext) -> Value {
    let sources = plan.upstream(node_id);
    if sources.is_empty() {
        return match &ctx.options().trigger_payload {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(payload) => payload.clone(),
        };
    }

    let mut merged = Map::new();
    for source in sources {
        match ctx.node_output(source) {
            Some(Value::Object(fields)) => {
                for (key, value) in fields {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                merged.insert(source.clone(), other.clone());
            }
            None => {}
        }
    }
    Value::Object(merged)
}

/// Result of dispatching one node, retries included.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub result: Result<Value, NodeError>,
    /// Retries performed after the first attempt.
    pub retry_count: u32,
}

/// Dispatch `node`, retrying [`NodeError::Retryable`] failures up to
/// `ctx.max_retries` times with exponential back-off
/// (`base_delay * 2^(retry - 1)`).
///
/// A panic inside the dispatcher is reported as a fatal error. Retrying stops
/// as soon as the run is cancelled.
pub async fn dispatch_with_retry(
    dispatcher: &dyn NodeDispatcher,
    node: &WorkflowNode,
    input: &Value,
    mut ctx: DispatchContext,
    base_delay: Duration,
) -> DispatchOutcome {
    let mut retries = 0u32;

    loop {
        ctx.attempt = retries;
        let result = AssertUnwindSafe(dispatcher.execute(node, input.clone(), &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(NodeError::Fatal(panic_message(panic.as_ref()))));

        let retry_message = match &result {
            Err(NodeError::Retryable(msg)) if retries < ctx.max_retries && !ctx.is_cancelled() => {
                Some(msg.clone())
            }
            _ => None,
        };
        let Some(message) = retry_message else {
            return DispatchOutcome {
                result,
                retry_count: retries,
            };
        };

        retries += 1;
        let delay = base_delay.saturating_mul(2u32.saturating_pow(retries - 1));

        warn!(
            "node '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
            node.id, retries, ctx.max_retries, delay, message
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancellation.cancelled() => {
                return DispatchOutcome {
                    result,
                    retry_count: retries - 1,
                };
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned());
    format!("dispatcher panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nodes::mock::MockDispatcher;
    use nodes::NodeCategory;
    use serde_json::json;

    use crate::models::{ExecutionOptions, Workflow, WorkflowEdge};
    use crate::planner::plan_execution;

    fn node(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, NodeCategory::Integration, "mock")
    }

    fn fan_in() -> Workflow {
        Workflow::new(
            "fan-in",
            vec![node("a"), node("b"), node("c"), node("d")],
            vec![
                WorkflowEdge::new("a", "d"),
                WorkflowEdge::new("b", "d"),
                WorkflowEdge::new("c", "d"),
            ],
        )
    }

    fn ctx_for(wf: &Workflow, payload: Option<Value>) -> ExecutionContext {
        let mut options = ExecutionOptions::new("org");
        options.trigger_payload = payload;
        ExecutionContext::new(Arc::new(wf.clone()), options)
    }

    #[test]
    fn root_receives_trigger_payload_or_empty_object() {
        let wf = fan_in();
        let plan = plan_execution(&wf).unwrap();

        let ctx = ctx_for(&wf, Some(json!({ "x": 1 })));
        assert_eq!(resolve_input("a", &plan, &ctx), json!({ "x": 1 }));

        let ctx = ctx_for(&wf, None);
        assert_eq!(resolve_input("a", &plan, &ctx), json!({}));

        let ctx = ctx_for(&wf, Some(Value::Null));
        assert_eq!(resolve_input("a", &plan, &ctx), json!({}));
        assert!(ctx.variables().is_empty());

        let ctx = ctx_for(&wf, Some(json!([1, 2])));
        assert_eq!(resolve_input("a", &plan, &ctx), json!([1, 2]));
    }

    #[test]
    fn upstream_outputs_merge_with_last_writer_winning() {
        let wf = fan_in();
        let plan = plan_execution(&wf).unwrap();
        let mut ctx = ctx_for(&wf, Some(json!({ "ignored": true })));

        ctx.set_node_output("a", json!({ "a": 1, "shared": "from-a" }));
        ctx.set_node_output("b", json!("plain text"));
        ctx.set_node_output("c", json!({ "c": 3, "shared": "from-c" }));

        assert_eq!(
            resolve_input("d", &plan, &ctx),
            json!({ "a": 1, "b": "plain text", "c": 3, "shared": "from-c" })
        );
    }

    #[test]
    fn upstream_without_output_contributes_nothing() {
        let wf = fan_in();
        let plan = plan_execution(&wf).unwrap();
        let mut ctx = ctx_for(&wf, None);
        ctx.set_node_output("b", json!({ "b": 2 }));

        assert_eq!(resolve_input("d", &plan, &ctx), json!({ "b": 2 }));
    }

    fn dispatch_ctx(max_retries: u32) -> DispatchContext {
        let mut ctx = DispatchContext::new(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), "org");
        ctx.max_retries = max_retries;
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_back_off_then_succeed() {
        let mock = MockDispatcher::new().flaky("f", 2, json!({ "ok": true }));
        let started = tokio::time::Instant::now();

        let outcome = dispatch_with_retry(
            &mock,
            &node("f"),
            &json!({}),
            dispatch_ctx(3),
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(outcome.result, Ok(json!({ "ok": true })));
        assert_eq!(outcome.retry_count, 2);
        // 100ms + 200ms of back-off.
        assert!(started.elapsed() >= Duration::from_millis(300));
        let attempts: Vec<u32> = mock.calls.lock().iter().map(|c| c.attempt).collect();
        assert_eq!(attempts, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let mock = MockDispatcher::new().failing_retryable("f", "503 from upstream");

        let outcome =
            dispatch_with_retry(&mock, &node("f"), &json!({}), dispatch_ctx(2), Duration::from_millis(10)).await;

        assert_eq!(outcome.result, Err(NodeError::Retryable("503 from upstream".into())));
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(mock.call_count("f"), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let mock = MockDispatcher::new().failing_fatal("f", "bad credentials");

        let outcome =
            dispatch_with_retry(&mock, &node("f"), &json!({}), dispatch_ctx(3), Duration::from_millis(10)).await;

        assert_eq!(outcome.result, Err(NodeError::Fatal("bad credentials".into())));
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(mock.call_count("f"), 1);
    }

    #[tokio::test]
    async fn cancelled_run_stops_retrying() {
        let mock = MockDispatcher::new().failing_retryable("f", "busy");
        let ctx = dispatch_ctx(5);
        ctx.cancellation.cancel();

        let outcome = dispatch_with_retry(&mock, &node("f"), &json!({}), ctx, Duration::from_secs(60)).await;

        assert_eq!(outcome.retry_count, 0);
        assert_eq!(mock.call_count("f"), 1);
    }

    #[tokio::test]
    async fn panics_become_fatal_errors() {
        let mock = MockDispatcher::new().panicking("p", "index out of bounds");

        let outcome =
            dispatch_with_retry(&mock, &node("p"), &json!({}), dispatch_ctx(3), Duration::from_millis(10)).await;

        assert_eq!(
            outcome.result,
            Err(NodeError::Fatal("dispatcher panicked: index out of bounds".into()))
        );
    }
}
