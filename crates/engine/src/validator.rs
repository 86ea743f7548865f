//! Graph validation: run this before planning or executing a workflow.
//!
//! Rules enforced:
//! 1. The workflow has at least one node.
//! 2. Node IDs and edge IDs are unique within the workflow.
//! 3. Every edge references existing nodes (both `source` and `target`).
//! 4. No edge connects a node to itself.
//! 5. No edge targets a trigger node (triggers are graph sources).
//! 6. No edge originates from an action node (actions are terminal).
//!
//! Acyclicity is left to the planner, which detects it as a by-product of
//! ordering the graph.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::{NodeCategory, Workflow, WorkflowNode};
use crate::EngineError;

/// Outcome of validating a workflow. Collects every violation found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Convert into a result, joining all messages into one
    /// [`EngineError::Validation`].
    pub fn into_result(self) -> Result<(), EngineError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(EngineError::Validation(self.errors.join("; ")))
        }
    }
}

/// Check the structural correctness of a workflow graph.
pub fn validate_workflow(workflow: &Workflow) -> ValidationReport {
    let mut errors = Vec::new();

    if workflow.nodes.is_empty() {
        errors.push("workflow must contain at least one node".to_owned());
    }

    // -----------------------------------------------------------------------
    // Unique identifiers
    // -----------------------------------------------------------------------
    let mut nodes: HashMap<&str, &WorkflowNode> = HashMap::new();
    for node in &workflow.nodes {
        if nodes.insert(node.id.as_str(), node).is_some() {
            errors.push(format!("duplicate node ID '{}'", node.id));
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::new();
    for edge in &workflow.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            errors.push(format!("duplicate edge ID '{}'", edge.id));
        }
    }

    // -----------------------------------------------------------------------
    // Edge endpoints and category rules
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        let source = nodes.get(edge.source.as_str());
        let target = nodes.get(edge.target.as_str());

        if source.is_none() {
            errors.push(format!(
                "edge '{}' references unknown source node '{}'",
                edge.id, edge.source
            ));
        }
        if target.is_none() {
            errors.push(format!(
                "edge '{}' references unknown target node '{}'",
                edge.id, edge.target
            ));
        }

        if edge.source == edge.target {
            errors.push(format!(
                "edge '{}' connects node '{}' to itself",
                edge.id, edge.source
            ));
        }

        if let Some(target) = target {
            if target.category == NodeCategory::Trigger {
                errors.push(format!(
                    "edge '{}' targets trigger node '{}'; triggers cannot have incoming edges",
                    edge.id, target.id
                ));
            }
        }
        if let Some(source) = source {
            if source.category == NodeCategory::Action {
                errors.push(format!(
                    "edge '{}' originates from action node '{}'; actions cannot have outgoing edges",
                    edge.id, source.id
                ));
            }
        }
    }

    ValidationReport::from_errors(errors)
}
