//! Execution context for workflow runs
//!
//! This module handles:
//! - Key paths (`dataset.uri`, `$.metrics.accuracy`)
//! - The JSON context threaded through a run (get / set / merge)
//! - Tagged parameter values resolved against the context

mod execution;
mod path;
mod value;

pub use execution::{ContextError, ExecutionContext, MergeClaims};
pub use path::{KeyPath, PathError};
pub use value::{ContextRef, Param, ParamValue};
