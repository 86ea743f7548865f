//! The node definition handed to dispatchers.
//!
//! Defined here (in the nodes crate) so both the engine and individual
//! dispatchers can import it without a circular dependency.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// NodeCategory
// ---------------------------------------------------------------------------

/// Broad role of a node inside the graph.
///
/// The category drives the structural rules of the graph: triggers are
/// sources (nothing may point at them) and actions are terminal (nothing may
/// leave them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Action,
    Logic,
    Integration,
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger => write!(f, "trigger"),
            Self::Action => write!(f, "action"),
            Self::Logic => write!(f, "logic"),
            Self::Integration => write!(f, "integration"),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowNode
// ---------------------------------------------------------------------------

/// Configuration key that lets a node fail without aborting the run.
pub const CONTINUE_ON_ERROR: &str = "continueOnError";
/// Configuration key holding a conditional node's branch predicate.
pub const CONDITION: &str = "condition";
/// Configuration key naming a variable that receives the node's output.
pub const OUTPUT_VARIABLE: &str = "outputVariable";

/// A single typed step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier within the workflow (referenced by edges).
    pub id: String,
    /// Human readable label, copied into every `NodeExecution`.
    pub name: String,
    pub category: NodeCategory,
    /// Subtype within the category (`"webhook"`, `"send_email"`, `"condition"` ...).
    /// Dispatcher registries route on this value.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Arbitrary configuration passed to the dispatcher at execution time.
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

impl WorkflowNode {
    /// Create a node with an empty configuration. The name defaults to the id.
    pub fn new(id: impl Into<String>, category: NodeCategory, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category,
            node_type: node_type.into(),
            configuration: Map::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set one configuration entry.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Whether a dispatch failure of this node is recorded and skipped over
    /// instead of aborting the run.
    pub fn continue_on_error(&self) -> bool {
        self.configuration
            .get(CONTINUE_ON_ERROR)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Conditional logic nodes gate the rest of the run on a predicate.
    pub fn is_conditional(&self) -> bool {
        self.category == NodeCategory::Logic && matches!(self.node_type.as_str(), "condition" | "if")
    }

    /// The raw branch predicate, if one is configured.
    pub fn condition(&self) -> Option<&Value> {
        self.configuration.get(CONDITION).filter(|v| !v.is_null())
    }

    pub fn output_variable(&self) -> Option<&str> {
        self.configuration.get(OUTPUT_VARIABLE).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_editor_shape() {
        let node: WorkflowNode = serde_json::from_value(json!({
            "id": "check",
            "name": "Check stock",
            "category": "logic",
            "type": "condition",
            "configuration": { "condition": "output.count > 0", "continueOnError": true }
        }))
        .expect("valid node");

        assert_eq!(node.category, NodeCategory::Logic);
        assert_eq!(node.node_type, "condition");
        assert!(node.is_conditional());
        assert!(node.continue_on_error());
        assert_eq!(node.condition(), Some(&json!("output.count > 0")));
    }

    #[test]
    fn configuration_defaults_to_empty() {
        let node: WorkflowNode = serde_json::from_value(json!({
            "id": "t", "name": "Start", "category": "trigger", "type": "manual"
        }))
        .expect("valid node");

        assert!(node.configuration.is_empty());
        assert!(!node.continue_on_error());
        assert!(node.condition().is_none());
    }

    #[test]
    fn only_logic_condition_nodes_are_conditional() {
        assert!(WorkflowNode::new("a", NodeCategory::Logic, "if").is_conditional());
        assert!(!WorkflowNode::new("b", NodeCategory::Logic, "loop").is_conditional());
        assert!(!WorkflowNode::new("c", NodeCategory::Action, "condition").is_conditional());
    }

    #[test]
    fn non_boolean_continue_on_error_is_ignored() {
        let node = WorkflowNode::new("a", NodeCategory::Action, "http")
            .with_config(CONTINUE_ON_ERROR, json!("yes"));
        assert!(!node.continue_on_error());
    }
}
