//! Execution planning: a deterministic topological order over the nodes.
//!
//! Uses Kahn's algorithm (in-degree counting). Among nodes that are ready at
//! the same time, the one declared first in the workflow goes first, so the
//! same graph always yields the same order.
//!
//! Nodes with no path from any trigger are still planned and visited once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::{EngineError, models::Workflow};

/// A topologically sorted run order plus the upstream lookup derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<String>,
    /// node id → distinct source node ids, ordered by plan position.
    upstream: HashMap<String, Vec<String>>,
}

impl ExecutionPlan {
    /// Node ids in execution order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Sources of the node's incoming edges, in plan order. Empty for roots.
    pub fn upstream(&self, node_id: &str) -> &[String] {
        self.upstream.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Compute the execution order for `workflow`.
///
/// Edges that reference unknown nodes are ignored here; the validator
/// reports them.
///
/// # Errors
/// - [`EngineError::NoExecutableNodes`] if no node is free of dependencies.
/// - [`EngineError::CycleDetected`] if some nodes can never become ready.
pub fn plan_execution(workflow: &Workflow) -> Result<ExecutionPlan, EngineError> {
    let node_count = workflow.nodes.len();

    // First declaration wins if an id is duplicated.
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(node_count);
    for (i, node) in workflow.nodes.iter().enumerate() {
        index.entry(node.id.as_str()).or_insert(i);
    }

    // -----------------------------------------------------------------------
    // Build adjacency list and in-degree table.
    // -----------------------------------------------------------------------
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    let mut in_degree: Vec<usize> = vec![0; node_count];

    for edge in &workflow.edges {
        if let (Some(&from), Some(&to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            adjacency[from].push(to);
            in_degree[to] += 1;
        }
    }

    // Seed with nodes that have no incoming edges; min-heap on declaration index.
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut sorted: Vec<usize> = Vec::with_capacity(node_count);

    while let Some(Reverse(i)) = ready.pop() {
        sorted.push(i);

        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if sorted.is_empty() && node_count > 0 {
        return Err(EngineError::NoExecutableNodes);
    }

    // Whatever is left still waits on an edge that can never be satisfied.
    if sorted.len() != node_count {
        let unresolved = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > 0)
            .map(|(i, _)| workflow.nodes[i].id.clone())
            .collect();
        return Err(EngineError::CycleDetected { unresolved });
    }

    let order: Vec<String> = sorted.iter().map(|&i| workflow.nodes[i].id.clone()).collect();
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, id)| (id.as_str(), pos))
        .collect();

    let mut upstream: HashMap<String, Vec<String>> = HashMap::new();
    for edge in &workflow.edges {
        if position.contains_key(edge.source.as_str()) && position.contains_key(edge.target.as_str()) {
            let sources = upstream.entry(edge.target.clone()).or_default();
            if !sources.contains(&edge.source) {
                sources.push(edge.source.clone());
            }
        }
    }
    for sources in upstream.values_mut() {
        sources.sort_by_key(|id| position[id.as_str()]);
    }

    Ok(ExecutionPlan { order, upstream })
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeCategory, WorkflowEdge, WorkflowNode};

    fn make_node(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, NodeCategory::Logic, "mock")
    }

    fn make_workflow(ids: &[&str], edges: &[(&str, &str)]) -> Workflow {
        Workflow::new(
            "test",
            ids.iter().map(|id| make_node(id)).collect(),
            edges.iter().map(|(f, t)| WorkflowEdge::new(*f, *t)).collect(),
        )
    }

    fn assert_respects_edges(wf: &Workflow, plan: &ExecutionPlan) {
        let pos = |id: &str| plan.order().iter().position(|n| n == id).unwrap();
        for edge in &wf.edges {
            assert!(
                pos(&edge.source) < pos(&edge.target),
                "{} must precede {}",
                edge.source,
                edge.target
            );
        }
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let wf = make_workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let plan = plan_execution(&wf).expect("should be valid");
        assert_eq!(plan.order(), ["a", "b", "c"]);
    }

    #[test]
    fn declaration_order_breaks_ties() {
        // Declared out of dependency order; c and b are both ready after a.
        let wf = make_workflow(&["c", "b", "a", "d"], &[("a", "c"), ("a", "b"), ("b", "d")]);
        let plan = plan_execution(&wf).expect("valid");
        assert_eq!(plan.order(), ["a", "c", "b", "d"]);

        // Re-planning is reproducible.
        assert_eq!(plan_execution(&wf).unwrap(), plan);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let wf = make_workflow(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        let plan = plan_execution(&wf).expect("should be valid");
        assert_eq!(plan.order(), ["a", "b", "c", "d"]);
        assert_eq!(plan.upstream("d"), ["b", "c"]);
        assert!(plan.upstream("a").is_empty());
        assert_respects_edges(&wf, &plan);
    }

    #[test]
    fn order_is_a_permutation_respecting_every_edge() {
        let wf = make_workflow(
            &["e", "d", "c", "b", "a", "f"],
            &[("a", "b"), ("a", "c"), ("c", "d"), ("b", "d"), ("d", "e"), ("c", "e")],
        );

        let plan = plan_execution(&wf).unwrap();
        let mut ids: Vec<&str> = plan.order().iter().map(String::as_str).collect();
        ids.sort_unstable();
        assert_eq!(ids, ["a", "b", "c", "d", "e", "f"]);
        assert_respects_edges(&wf, &plan);
    }

    #[test]
    fn disconnected_nodes_are_still_planned() {
        let wf = make_workflow(&["t", "orphan", "a"], &[("t", "a")]);
        let plan = plan_execution(&wf).unwrap();
        assert_eq!(plan.order(), ["t", "orphan", "a"]);
    }

    #[test]
    fn full_cycle_has_no_executable_nodes() {
        // A → B → C → A  (cycle!)
        let wf = make_workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        assert_eq!(plan_execution(&wf), Err(EngineError::NoExecutableNodes));
    }

    #[test]
    fn partial_cycle_is_detected() {
        let wf = make_workflow(&["t", "x", "y"], &[("t", "x"), ("x", "y"), ("y", "x")]);
        assert_eq!(
            plan_execution(&wf),
            Err(EngineError::CycleDetected {
                unresolved: vec!["x".into(), "y".into()]
            })
        );
    }

    #[test]
    fn duplicate_edges_are_collapsed_in_upstream() {
        let wf = make_workflow(&["a", "b"], &[("a", "b"), ("a", "b")]);
        let plan = plan_execution(&wf).unwrap();
        assert_eq!(plan.order(), ["a", "b"]);
        assert_eq!(plan.upstream("b"), ["a"]);
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let wf = make_workflow(&["solo"], &[]);
        let plan = plan_execution(&wf).expect("single node should be valid");
        assert_eq!(plan.order(), ["solo"]);
        assert_eq!(plan.len(), 1);
    }
}
