//! CLI module for stepflow
//!
//! This module provides:
//! - Command implementations (run, validate, resume, history, etc.)
//! - Output handlers (console, JSON, quiet)
//!
//! # Example
//!
//! ```ignore
//! use stepflow::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::run_graph("retrain", &args, None, dir, &config, &*handler).await?;
//! ```

pub mod commands;
pub mod output;

pub use commands::{
    history, list_graphs, list_invocables, resume_run, run_graph, show_run, validate_graph,
};
pub use output::{OutputMode, create_handler};
