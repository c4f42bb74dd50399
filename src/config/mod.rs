//! Configuration types and loading for stepflow

mod error;
mod graph;
mod invocable;
mod loader;

pub use error::{ErrorInfo, ErrorKind, NodeError};
#[allow(unused_imports)]
pub use graph::{
    ArgDef, BranchConfig, CatchConfig, ChoiceRuleConfig, GraphConfig, NodeConfig, NodeType,
    RetryConfig,
};
pub use invocable::InvocableConfig;
#[allow(unused_imports)]
pub use loader::{Defaults, StepflowConfig, expand_path, list_graphs, load_graph, load_graph_file};
