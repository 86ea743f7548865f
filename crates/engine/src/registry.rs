//! Registry of runs that are currently in flight.
//!
//! Owned by an executor and injected at construction, so two executors never
//! see each other's runs unless they are handed the same registry. Entries
//! are removed by a [`RunGuard`] when the run ends, whatever the exit path.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::context::SharedContext;

#[derive(Debug, Default)]
pub struct ActiveRuns {
    runs: DashMap<Uuid, SharedContext>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh registry ready to be handed to an executor.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a run. The entry lives as long as the returned guard.
    pub fn register(self: &Arc<Self>, execution_id: Uuid, context: SharedContext) -> RunGuard {
        self.runs.insert(execution_id, context);
        RunGuard {
            runs: Arc::clone(self),
            execution_id,
        }
    }

    pub fn get(&self, execution_id: Uuid) -> Option<SharedContext> {
        self.runs.get(&execution_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, execution_id: Uuid) -> bool {
        self.runs.contains_key(&execution_id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.runs.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Removes its run from the registry when dropped.
#[derive(Debug)]
pub struct RunGuard {
    runs: Arc<ActiveRuns>,
    execution_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.runs.remove(&self.execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::models::{ExecutionOptions, NodeCategory, Workflow, WorkflowNode};
    use parking_lot::Mutex;

    fn shared_context() -> SharedContext {
        let wf = Workflow::new(
            "reg",
            vec![WorkflowNode::new("t", NodeCategory::Trigger, "manual")],
            vec![],
        );
        Arc::new(Mutex::new(ExecutionContext::new(Arc::new(wf), ExecutionOptions::new("org"))))
    }

    #[test]
    fn guard_removes_entry_on_drop() {
        let runs = ActiveRuns::shared();
        let ctx = shared_context();
        let id = ctx.lock().execution_id();

        {
            let _guard = runs.register(id, Arc::clone(&ctx));
            assert!(runs.contains(id));
            assert_eq!(runs.ids(), vec![id]);
            assert!(Arc::ptr_eq(&runs.get(id).unwrap(), &ctx));
        }

        assert!(runs.is_empty());
        assert!(runs.get(id).is_none());
    }

    #[test]
    fn registries_are_isolated() {
        let first = ActiveRuns::shared();
        let second = ActiveRuns::shared();
        let ctx = shared_context();
        let id = ctx.lock().execution_id();

        let _guard = first.register(id, ctx);
        assert_eq!(first.len(), 1);
        assert!(!second.contains(id));
    }
}
