//! Node actions: task dispatch with retries, pass writes, choice selection

use super::policy::RetryTracker;
use crate::config::{ErrorKind, NodeError};
use crate::context::{ContextError, ExecutionContext};
use crate::graph::{ChoiceNode, FailNode, InputSelector, PassNode, TaskNode};
use crate::invoker::{InvocableRegistry, InvokeRequest};
use crate::template::TemplateEngine;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Shared, read-only services for every run
#[derive(Debug, Clone)]
pub struct Engine {
    pub registry: InvocableRegistry,
    pub templates: TemplateEngine,

    /// Task timeout when neither the node nor the invocable sets one
    pub default_timeout: Duration,
}

impl Engine {
    pub fn new(registry: InvocableRegistry) -> Self {
        Self {
            registry,
            templates: TemplateEngine::new(),
            default_timeout: Duration::from_secs(300),
        }
    }
}

/// Build a task's payload from the context
pub fn resolve_input(input: &InputSelector, ctx: &ExecutionContext) -> Result<Value, ContextError> {
    match input {
        InputSelector::Context => Ok(ctx.snapshot()),
        InputSelector::Path(path) => ctx.get(path).cloned(),
        InputSelector::Parameters(param) => param.resolve(ctx),
    }
}

/// Run a task node to success or a final error
///
/// Retries follow the node's retry rules; the output is written at the
/// result path (or discarded without one). Returns the number of attempts.
pub async fn run_task(
    engine: &Engine,
    node: &str,
    task: &TaskNode,
    ctx: &mut ExecutionContext,
) -> Result<u32, NodeError> {
    let started_at = chrono::Utc::now();
    let start = Instant::now();
    let fail = |kind: ErrorKind, attempt: u32, max: u32| {
        NodeError::new(kind, node)
            .with_timing(started_at, start.elapsed().as_millis() as u64)
            .with_attempt(attempt, max)
    };

    let payload = resolve_input(&task.input, ctx).map_err(|e| fail(e.into(), 1, 1))?;
    let invocable = engine.registry.get(&task.invocable).ok_or_else(|| {
        fail(
            ErrorKind::task_failed(format!("invocable '{}' is not registered", task.invocable)),
            1,
            1,
        )
    })?;

    let timeout = task
        .timeout
        .or_else(|| invocable.default_timeout())
        .unwrap_or(engine.default_timeout);
    let request = InvokeRequest::new(node, payload).with_timeout(timeout);

    let max_attempts = RetryTracker::max_attempts(&task.retry);
    let mut tracker = RetryTracker::new(&task.retry);
    let mut attempt = 1;

    loop {
        tracing::debug!(node, invocable = %task.invocable, attempt, "invoking");

        let result = match tokio::time::timeout(timeout, invocable.invoke(&request)).await {
            Ok(result) => result.map_err(|e| e.into_error_kind()),
            Err(_) => Err(ErrorKind::Timeout { elapsed: timeout }),
        };

        match result {
            Ok(response) => {
                tracing::info!(
                    node,
                    attempt,
                    duration_ms = response.duration.as_millis() as u64,
                    "task succeeded"
                );
                if let Some(path) = &task.result_path {
                    ctx.set(path, response.output)
                        .map_err(|e| fail(e.into(), attempt, max_attempts))?;
                }
                return Ok(attempt);
            }
            Err(kind) => match tracker.next_delay(&task.retry, &kind) {
                Some(delay) => {
                    tracing::warn!(
                        node,
                        attempt,
                        error = kind.name(),
                        delay_ms = delay.as_millis() as u64,
                        "task failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(fail(kind, attempt, max_attempts)),
            },
        }
    }
}

/// Write a pass node's result into the context
pub fn run_pass(pass: &PassNode, ctx: &mut ExecutionContext) -> Result<(), ContextError> {
    if let (Some(result), Some(path)) = (&pass.result, &pass.result_path) {
        let value = result.resolve(ctx)?;
        ctx.set(path, value)?;
    }
    Ok(())
}

/// First rule whose predicate matches, else the default
pub fn choose<'a>(choice: &'a ChoiceNode, ctx: &ExecutionContext) -> Result<&'a str, ContextError> {
    for rule in &choice.rules {
        let value = match ctx.get(&rule.variable) {
            Ok(value) => Some(value),
            Err(e) if rule.predicate.needs_value() => return Err(e),
            Err(_) => None,
        };
        if rule.predicate.matches(value) {
            return Ok(&rule.next);
        }
    }
    Ok(&choice.default)
}

/// Error raised by a fail node, with its cause rendered against the context
pub fn fail_error(engine: &Engine, node: &str, fail: &FailNode, ctx: &ExecutionContext) -> NodeError {
    let cause = match &fail.cause {
        Some(template) => engine
            .templates
            .render(template, ctx.as_value())
            .unwrap_or_else(|e| {
                tracing::warn!(node, error = %e, "failed to render cause, using it verbatim");
                template.clone()
            }),
        None => String::new(),
    };
    NodeError::new(ErrorKind::from_name(&fail.error, cause), node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::{Graph, NodeKind};
    use crate::invoker::InvokeError;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn graph(toml: &str) -> Graph {
        let config: GraphConfig = toml::from_str(toml).unwrap();
        Graph::build(&config).unwrap()
    }

    fn task<'a>(graph: &'a Graph, name: &str) -> &'a TaskNode {
        match &graph.find_node(name).unwrap().kind {
            NodeKind::Task(task) => task,
            other => panic!("expected task, got {:?}", other),
        }
    }

    const TASK_GRAPH: &str = r#"
        name = "one-task"
        start_at = "Train"

        [args.dataset]
        required = true

        [[nodes]]
        name = "Train"
        type = "task"
        invocable = "train"
        result_path = "model"
        next = "Done"

        [nodes.parameters]
        data = { ref = "dataset.uri" }
        epochs = 3

        [[nodes.retry]]
        errors = ["TaskFailed"]
        max_attempts = 2
        interval = 1

        [[nodes]]
        name = "Done"
        type = "succeed"
    "#;

    fn context() -> ExecutionContext {
        ExecutionContext::from_value(json!({"dataset": {"uri": "s3://d/train.csv"}})).unwrap()
    }

    #[tokio::test]
    async fn test_task_resolves_parameters_and_writes_result() {
        let g = graph(TASK_GRAPH);
        let mut registry = InvocableRegistry::new();
        registry.register_fn("train", |payload| {
            Ok(json!({"trained_on": payload["data"], "epochs": payload["epochs"]}))
        });
        let engine = Engine::new(registry);
        let mut ctx = context();

        let attempts = run_task(&engine, "Train", task(&g, "Train"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(
            ctx.as_value()["model"],
            json!({"trained_on": "s3://d/train.csv", "epochs": 3})
        );
    }

    #[tokio::test]
    async fn test_task_retries_until_success() {
        let g = graph(TASK_GRAPH);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = InvocableRegistry::new();
        registry.register_fn("train", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(InvokeError::failed("flaky"))
            } else {
                Ok(json!("ok"))
            }
        });
        let engine = Engine::new(registry);
        let mut ctx = context();

        let attempts = run_task(&engine, "Train", task(&g, "Train"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_task_retries_exhausted() {
        let g = graph(TASK_GRAPH);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = InvocableRegistry::new();
        registry.register_fn("train", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(InvokeError::failed("always broken"))
        });
        let engine = Engine::new(registry);
        let mut ctx = context();

        let err = run_task(&engine, "Train", task(&g, "Train"), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind.name(), "TaskFailed");
        assert_eq!(err.attempt, 3);
        assert_eq!(err.max_attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!ctx.as_value().as_object().unwrap().contains_key("model"));
    }

    #[tokio::test]
    async fn test_unmatched_error_is_not_retried() {
        let g = graph(TASK_GRAPH);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = InvocableRegistry::new();
        registry.register_fn("train", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(InvokeError::permission_denied("no role"))
        });
        let engine = Engine::new(registry);

        let err = run_task(&engine, "Train", task(&g, "Train"), &mut context())
            .await
            .unwrap_err();
        assert_eq!(err.kind.name(), "PermissionDenied");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_is_path_not_found() {
        let g = graph(TASK_GRAPH);
        let mut registry = InvocableRegistry::new();
        registry.register_fn("train", |_| Ok(json!(null)));
        let engine = Engine::new(registry);

        let err = run_task(&engine, "Train", task(&g, "Train"), &mut ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind.name(), "PathNotFound");
    }

    #[test]
    fn test_choose_in_order_with_default() {
        let g = graph(
            r#"
            name = "thresholds"
            start_at = "Grade"

            [args.score]

            [[nodes]]
            name = "Grade"
            type = "choice"
            default = "Low"

            [[nodes.choices]]
            variable = "score"
            numeric_greater_than_equals = 90
            next = "High"

            [[nodes.choices]]
            variable = "score"
            numeric_greater_than_equals = 70
            next = "Medium"

            [[nodes.choices]]
            variable = "score"
            numeric_greater_than_equals = 50
            next = "Pass"

            [[nodes]]
            name = "High"
            type = "succeed"

            [[nodes]]
            name = "Medium"
            type = "succeed"

            [[nodes]]
            name = "Pass"
            type = "succeed"

            [[nodes]]
            name = "Low"
            type = "fail"
            error = "TooLow"
        "#,
        );
        let NodeKind::Choice(choice) = &g.find_node("Grade").unwrap().kind else {
            panic!("expected choice");
        };

        let pick = |score: Value| {
            let ctx = ExecutionContext::from_value(json!({ "score": score })).unwrap();
            choose(choice, &ctx).unwrap().to_string()
        };
        assert_eq!(pick(json!(95)), "High");
        assert_eq!(pick(json!(90)), "High");
        assert_eq!(pick(json!(75)), "Medium");
        assert_eq!(pick(json!(50)), "Pass");
        assert_eq!(pick(json!(10)), "Low");
        // Type mismatch falls through to the default
        assert_eq!(pick(json!("95")), "Low");

        let err = choose(choice, &ExecutionContext::new()).unwrap_err();
        assert!(matches!(err, ContextError::PathNotFound { .. }));
    }

    #[test]
    fn test_pass_writes_resolved_result() {
        let g = graph(
            r#"
            name = "seed"
            start_at = "Seed"

            [args.run]

            [[nodes]]
            name = "Seed"
            type = "pass"
            result_path = "config"
            next = "Done"

            [nodes.result]
            threshold = 0.8
            run = { ref = "run" }

            [[nodes]]
            name = "Done"
            type = "succeed"
        "#,
        );
        let NodeKind::Pass(pass) = &g.find_node("Seed").unwrap().kind else {
            panic!("expected pass");
        };
        let mut ctx = ExecutionContext::from_value(json!({"run": "nightly"})).unwrap();
        run_pass(pass, &mut ctx).unwrap();
        assert_eq!(
            ctx.as_value()["config"],
            json!({"threshold": 0.8, "run": "nightly"})
        );
    }

    #[test]
    fn test_fail_error_renders_cause() {
        let engine = Engine::new(InvocableRegistry::new());
        let fail = FailNode {
            error: "TooLarge".into(),
            cause: Some("value {{ value }} exceeds limit".into()),
        };
        let ctx = ExecutionContext::from_value(json!({"value": 15})).unwrap();

        let err = fail_error(&engine, "Reject", &fail, &ctx);
        assert_eq!(err.kind.name(), "TooLarge");
        assert_eq!(err.kind.cause(), "value 15 exceeds limit");

        let broken = FailNode {
            error: "TaskFailed".into(),
            cause: Some("{{ missing }}".into()),
        };
        let err = fail_error(&engine, "Reject", &broken, &ctx);
        assert_eq!(err.kind.name(), "TaskFailed");
        assert_eq!(err.kind.cause(), "{{ missing }}");
    }
}
