//! Built-in dispatchers that need no external system.

use async_trait::async_trait;
use serde_json::Value;

use crate::log::LogLevel;
use crate::{DispatchContext, NodeDispatcher, NodeError, WorkflowNode};

/// Returns `configuration.output` when the node has one, otherwise echoes its
/// input. Handy for triggers, for wiring up graphs before real dispatchers
/// exist, and for dry runs from the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDispatcher;

#[async_trait]
impl NodeDispatcher for PassthroughDispatcher {
    async fn execute(
        &self,
        node: &WorkflowNode,
        input: Value,
        ctx: &DispatchContext,
    ) -> Result<Value, NodeError> {
        ctx.log(LogLevel::Debug, &format!("passthrough '{}'", node.id), None);

        Ok(node.configuration.get("output").cloned().unwrap_or(input))
    }
}
