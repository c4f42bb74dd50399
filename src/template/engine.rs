//! Template engine for failure causes and command arguments

use super::errors::TemplateError;
use super::filters;
use minijinja::Environment;
use serde_json::Value;

/// Template rendering engine
///
/// Wraps minijinja with custom filters and strict undefined handling.
/// Templates render against a JSON value, usually the execution context
/// or a task payload.
#[derive(Clone)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        filters::register_filters(&mut env);
        Self { env }
    }

    /// Render a template string against a JSON value
    ///
    /// # Example
    ///
    /// ```ignore
    /// let engine = TemplateEngine::new();
    /// let cause = engine.render("value {{ value }} too large", &json!({"value": 15}))?;
    /// assert_eq!(cause, "value 15 too large");
    /// ```
    pub fn render(&self, template: &str, data: &Value) -> Result<String, TemplateError> {
        self.env
            .render_str(template, data)
            .map_err(|e| convert_minijinja_error(e, template, data))
    }

    /// Check if a template is syntactically valid
    pub fn validate(&self, template: &str) -> Result<(), TemplateError> {
        let mut env = self.env.clone();
        env.add_template("__validate__", template)
            .map_err(|e| TemplateError::syntax(e.to_string(), e.line().unwrap_or(0)))
    }
}

fn convert_minijinja_error(err: minijinja::Error, template: &str, data: &Value) -> TemplateError {
    let line = err.line().unwrap_or(0);
    match err.kind() {
        minijinja::ErrorKind::UndefinedError => {
            let known: Vec<&str> = data
                .as_object()
                .map(|m| m.keys().map(String::as_str).collect())
                .unwrap_or_default();
            let name = undefined_name(&err, template).unwrap_or_else(|| "unknown".to_string());
            TemplateError::undefined_variable_at(name, line, &known)
        }
        minijinja::ErrorKind::UnknownFilter => {
            TemplateError::filter("unknown", err.to_string())
        }
        minijinja::ErrorKind::SyntaxError => TemplateError::syntax(err.to_string(), line),
        _ => TemplateError::Internal(err),
    }
}

/// Pull the expression that was undefined out of the error's source span
fn undefined_name(err: &minijinja::Error, template: &str) -> Option<String> {
    let text = template.get(err.range()?)?.trim();
    (!text.is_empty()).then(|| text.to_string())
}
