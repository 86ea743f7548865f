//! `nodes` crate: the dispatcher boundary between the engine and node behaviour.
//!
//! The engine never knows what a node *does*. It resolves the node's input,
//! hands both to a [`NodeDispatcher`], and records the outcome. Everything a
//! dispatcher needs to see (the node definition, a read-only view of the run)
//! lives here so dispatchers can be written without depending on the engine.

pub mod builtin;
pub mod error;
pub mod log;
pub mod mock;
pub mod node;
pub mod registry;
pub mod traits;

pub use builtin::PassthroughDispatcher;
pub use error::NodeError;
pub use log::LogLevel;
pub use node::{NodeCategory, WorkflowNode};
pub use registry::DispatcherRegistry;
pub use traits::{DispatchContext, NodeDispatcher};
