//! Validated workflow graphs
//!
//! A [`Graph`] is built once from a [`GraphConfig`](crate::config::GraphConfig)
//! and shared read-only by every run.
//!
//! # Example
//!
//! ```ignore
//! let config = load_graph("retrain", None, &StepflowConfig::default())?;
//! let graph = Graph::build(&config)?;
//! println!("{} nodes", graph.node_names().len());
//! ```

mod model;
mod validation;

#[allow(unused_imports)]
pub use model::{
    Branch, CatchRule, ChoiceNode, ChoiceRule, FailNode, Graph, InputSelector, Node, NodeKind,
    ParallelNode, PassNode, Predicate, RetryRule, Scope, TaskNode,
};
pub use validation::{GraphError, GraphErrors};
