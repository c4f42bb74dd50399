//! Workflow execution engine
//!
//! This module handles:
//! - Walking a validated graph node by node
//! - Task dispatch with retries and timeouts
//! - Catch transitions and Fail nodes
//! - Parallel fan-out, join and disjoint merge
//! - Run state, snapshots and resume checkpoints
//!
//! # Example
//!
//! ```ignore
//! use stepflow::graph::Graph;
//! use stepflow::invoker::InvocableRegistry;
//! use stepflow::workflow::WorkflowRunner;
//! use std::sync::Arc;
//!
//! let mut registry = InvocableRegistry::new();
//! registry.register_fn("create", |payload| Ok(json!({"id": "obj-1", "input": payload})));
//!
//! let graph = Arc::new(Graph::build(&config)?);
//! let run = WorkflowRunner::new(registry).run(graph, args).await?;
//!
//! if run.status == RunStatus::Succeeded {
//!     println!("final context: {}", run.context.as_value());
//! }
//! ```

mod executor;
mod policy;
mod runner;
mod state;

#[allow(unused_imports)]
pub use executor::Engine;
pub use policy::{Backoff, ErrorMatcher};
pub use runner::{RunHandle, WorkflowError, WorkflowRunner};
#[allow(unused_imports)]
pub use state::{
    BranchRecord, Checkpoint, ExecutionRun, NodeRecord, NodeStatus, RunLog, RunSnapshot,
    RunStatus,
};
