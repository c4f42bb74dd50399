//! Templating for stepflow
//!
//! Jinja2-compatible templates rendered against JSON values. Used for
//! Fail node causes (against the execution context) and command
//! invocable arguments (against the task payload).
//!
//! Filters: `shell_escape`, `json`, `join`, `default`, `trim`.

mod engine;
mod errors;
mod filters;

pub use engine::TemplateEngine;
pub use errors::TemplateError;
