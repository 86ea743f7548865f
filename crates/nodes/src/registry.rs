//! Routing dispatcher that picks an implementation by node type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{DispatchContext, NodeDispatcher, NodeError, WorkflowNode};

/// Maps `node_type` strings to dispatcher implementations.
///
/// The registry is itself a [`NodeDispatcher`], so the engine only ever sees
/// a single dispatcher regardless of how many node types are installed.
#[derive(Default, Clone)]
pub struct DispatcherRegistry {
    dispatchers: HashMap<String, Arc<dyn NodeDispatcher>>,
    fallback: Option<Arc<dyn NodeDispatcher>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the dispatcher for `node_type`, replacing any previous one.
    pub fn register(
        &mut self,
        node_type: impl Into<String>,
        dispatcher: Arc<dyn NodeDispatcher>,
    ) -> &mut Self {
        self.dispatchers.insert(node_type.into(), dispatcher);
        self
    }

    pub fn with(mut self, node_type: impl Into<String>, dispatcher: Arc<dyn NodeDispatcher>) -> Self {
        self.register(node_type, dispatcher);
        self
    }

    /// Dispatcher used for node types with no explicit registration.
    pub fn with_fallback(mut self, dispatcher: Arc<dyn NodeDispatcher>) -> Self {
        self.fallback = Some(dispatcher);
        self
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.dispatchers.contains_key(node_type)
    }

    fn resolve(&self, node_type: &str) -> Option<&Arc<dyn NodeDispatcher>> {
        self.dispatchers.get(node_type).or(self.fallback.as_ref())
    }
}

#[async_trait]
impl NodeDispatcher for DispatcherRegistry {
    async fn execute(
        &self,
        node: &WorkflowNode,
        input: Value,
        ctx: &DispatchContext,
    ) -> Result<Value, NodeError> {
        let dispatcher = self.resolve(&node.node_type).ok_or_else(|| {
            NodeError::Fatal(format!(
                "no dispatcher registered for node type '{}'",
                node.node_type
            ))
        })?;

        debug!(node_id = %node.id, node_type = %node.node_type, "routing dispatch");
        dispatcher.execute(node, input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDispatcher;
    use crate::{NodeCategory, PassthroughDispatcher};
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> DispatchContext {
        DispatchContext::new(Uuid::new_v4(), Uuid::new_v4(), "org-1")
    }

    #[tokio::test]
    async fn routes_by_node_type() {
        let email = Arc::new(MockDispatcher::new().returning("mail", json!({ "sent": true })));
        let registry = DispatcherRegistry::new().with("send_email", email.clone());

        let node = WorkflowNode::new("mail", NodeCategory::Action, "send_email");
        let out = registry.execute(&node, json!({}), &ctx()).await.expect("routed");

        assert_eq!(out, json!({ "sent": true }));
        assert_eq!(email.call_count("mail"), 1);
    }

    #[tokio::test]
    async fn unknown_type_is_fatal() {
        let registry = DispatcherRegistry::new();
        let node = WorkflowNode::new("x", NodeCategory::Integration, "crm_lookup");

        let err = registry.execute(&node, json!({}), &ctx()).await.unwrap_err();
        assert_eq!(
            err,
            NodeError::Fatal("no dispatcher registered for node type 'crm_lookup'".into())
        );
    }

    #[tokio::test]
    async fn fallback_handles_unregistered_types() {
        let registry = DispatcherRegistry::new().with_fallback(Arc::new(PassthroughDispatcher));
        let node = WorkflowNode::new("x", NodeCategory::Integration, "crm_lookup");

        let out = registry.execute(&node, json!({ "id": 7 }), &ctx()).await.expect("fallback");
        assert_eq!(out, json!({ "id": 7 }));
        assert!(!registry.contains("crm_lookup"));
    }
}
