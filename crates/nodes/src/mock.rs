//! `MockDispatcher`: a test double for `NodeDispatcher`.
//!
//! Useful in unit and integration tests where real node behaviour is either
//! unavailable or irrelevant. Behaviour is scripted per node id and every
//! dispatch is recorded, so tests can assert on the exact input each node
//! received and on the order nodes were dispatched in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{DispatchContext, NodeDispatcher, NodeError, WorkflowNode};

/// Behaviour injected into `MockDispatcher` for a node id.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return the resolved input unchanged.
    EchoInput,
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with `Retryable` for the first `failures` calls, then return `value`.
    Flaky { failures: usize, value: Value },
    /// Panic inside the dispatch.
    Panic(String),
}

/// A recorded dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub node_id: String,
    pub input: Value,
    pub attempt: u32,
}

/// A mock dispatcher that records every call it receives and returns a
/// programmer-specified result. Nodes with no script echo their input.
#[derive(Debug, Default)]
pub struct MockDispatcher {
    scripts: HashMap<String, MockBehaviour>,
    /// All dispatches seen by this mock (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behaviour of one node.
    pub fn on(mut self, node_id: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.scripts.insert(node_id.into(), behaviour);
        self
    }

    /// The node always succeeds with the given value.
    pub fn returning(self, node_id: impl Into<String>, value: Value) -> Self {
        self.on(node_id, MockBehaviour::ReturnValue(value))
    }

    /// The node always fails with a `Fatal` error.
    pub fn failing_fatal(self, node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        self.on(node_id, MockBehaviour::FailFatal(msg.into()))
    }

    /// The node always fails with a `Retryable` error.
    pub fn failing_retryable(self, node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        self.on(node_id, MockBehaviour::FailRetryable(msg.into()))
    }

    pub fn flaky(self, node_id: impl Into<String>, failures: usize, value: Value) -> Self {
        self.on(node_id, MockBehaviour::Flaky { failures, value })
    }

    pub fn panicking(self, node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        self.on(node_id, MockBehaviour::Panic(msg.into()))
    }

    /// Number of times the node has been dispatched.
    pub fn call_count(&self, node_id: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.node_id == node_id).count()
    }

    /// Inputs the node received, one per dispatch.
    pub fn inputs_for(&self, node_id: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.node_id == node_id)
            .map(|c| c.input.clone())
            .collect()
    }

    /// Node ids in dispatch order, retries included.
    pub fn dispatched(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.node_id.clone()).collect()
    }
}

#[async_trait]
impl NodeDispatcher for MockDispatcher {
    async fn execute(
        &self,
        node: &WorkflowNode,
        input: Value,
        ctx: &DispatchContext,
    ) -> Result<Value, NodeError> {
        let previous_calls = self.call_count(&node.id);
        self.calls.lock().push(MockCall {
            node_id: node.id.clone(),
            input: input.clone(),
            attempt: ctx.attempt,
        });

        match self.scripts.get(&node.id) {
            None | Some(MockBehaviour::EchoInput) => Ok(input),
            Some(MockBehaviour::ReturnValue(v)) => Ok(v.clone()),
            Some(MockBehaviour::FailRetryable(msg)) => Err(NodeError::Retryable(msg.clone())),
            Some(MockBehaviour::FailFatal(msg)) => Err(NodeError::Fatal(msg.clone())),
            Some(MockBehaviour::Flaky { failures, value }) => {
                if previous_calls < *failures {
                    Err(NodeError::Retryable(format!(
                        "transient failure {} of {failures}",
                        previous_calls + 1
                    )))
                } else {
                    Ok(value.clone())
                }
            }
            Some(MockBehaviour::Panic(msg)) => panic!("{msg}"),
        }
    }
}
