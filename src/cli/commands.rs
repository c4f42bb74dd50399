//! CLI command implementations

use super::output::{OutputEvent, OutputHandler, newly_finished};
use crate::config::{StepflowConfig, list_graphs as find_graphs, load_graph, load_graph_file};
use crate::graph::Graph;
use crate::invoker::InvocableRegistry;
use crate::store::RunStore;
use crate::workflow::{ExecutionRun, NodeStatus, RunHandle, RunStatus, WorkflowRunner};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Run a graph
pub async fn run_graph(
    graph_name: &str,
    args: &[String],
    input: Option<&Path>,
    project_dir: Option<&Path>,
    config: &StepflowConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let graph = build_graph(graph_name, project_dir, config)?;
    let mut run_args = match input {
        Some(path) => read_input(path)?,
        None => Map::new(),
    };
    run_args.extend(parse_run_args(args)?);

    let runner = create_runner(config)?;
    let handle = runner.start(Arc::clone(&graph), run_args)?;

    handler.emit(OutputEvent::RunStart {
        run_id: handle.id().to_string(),
        graph: graph.name.clone(),
        nodes: graph.node_names().len(),
    });

    let run = follow(handle, handler).await?;
    finish_run(&run, config, handler)
}

/// Resume a stored run from its checkpoint
pub async fn resume_run(
    run_id: &str,
    project_dir: Option<&Path>,
    config: &StepflowConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let store = open_store(config)?;
    let previous = store
        .get_run(run_id)?
        .with_context(|| format!("run '{}' not found", run_id))?;
    if previous.status == RunStatus::Succeeded {
        anyhow::bail!("run '{}' already succeeded", run_id);
    }
    let checkpoint = previous
        .checkpoint
        .clone()
        .with_context(|| format!("run '{}' has no checkpoint", run_id))?;

    let graph = build_graph(&previous.graph, project_dir, config)?;
    let runner = create_runner(config)?;
    let handle = runner.resume(Arc::clone(&graph), checkpoint.clone(), Some(previous.id.clone()))?;

    handler.emit(OutputEvent::RunStart {
        run_id: handle.id().to_string(),
        graph: graph.name.clone(),
        nodes: graph.node_names().len(),
    });
    handler.emit(OutputEvent::Info {
        message: format!("Resuming {} at '{}'", previous.id, checkpoint.node),
    });

    let run = follow(handle, handler).await?;
    finish_run(&run, config, handler)
}

/// Validate a graph without running it
pub fn validate_graph(
    graph_name: &str,
    project_dir: Option<&Path>,
    config: &StepflowConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let graph_config = match load_graph_source(graph_name, project_dir, config) {
        Ok(c) => c,
        Err(e) => {
            handler.emit(OutputEvent::RunError {
                error: format!("Failed to load graph: {:#}", e),
            });
            return Ok(1);
        }
    };

    match Graph::build(&graph_config) {
        Ok(graph) => {
            handler.emit(OutputEvent::Info {
                message: format!(
                    "✓ Graph '{}' is valid ({} nodes)",
                    graph.name,
                    graph.node_names().len()
                ),
            });

            let missing: Vec<&str> = graph
                .invocables()
                .into_iter()
                .filter(|name| config.get_invocable(name).is_none_or(|i| !i.enabled))
                .collect();
            for name in &missing {
                handler.emit(OutputEvent::Info {
                    message: format!("  warning: invocable '{}' is not configured", name),
                });
            }
            Ok(0)
        }
        Err(errors) => {
            handler.emit(OutputEvent::Info {
                message: format!(
                    "✗ Graph '{}' has {} error(s):",
                    graph_config.name,
                    errors.errors().len()
                ),
            });
            for err in errors.errors() {
                handler.emit(OutputEvent::Info {
                    message: format!("  - {}", err),
                });
            }
            Ok(1)
        }
    }
}

/// Show recent runs
pub fn history(
    graph: Option<&str>,
    limit: usize,
    config: &StepflowConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let store = open_store(config)?;
    let runs = store.list_runs(graph, limit)?;

    if runs.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no runs recorded)".into(),
        });
        return Ok(0);
    }

    for run in runs {
        let duration = run
            .duration_ms()
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".into());
        let mut line = format!(
            "{}  {:<9}  {}  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.status,
            run.id,
            duration
        );
        if let Some(error) = run.error {
            line.push_str(&format!("  [{}]", error));
        }
        handler.emit(OutputEvent::Info { message: line });
    }
    Ok(0)
}

/// Show one stored run in full
pub fn show_run(run_id: &str, config: &StepflowConfig, handler: &dyn OutputHandler) -> Result<i32> {
    let store = open_store(config)?;
    let Some(run) = store.get_run(run_id)? else {
        handler.emit(OutputEvent::RunError {
            error: format!("run '{}' not found", run_id),
        });
        return Ok(1);
    };

    handler.emit(OutputEvent::Info {
        message: format!("{} ({}) - {}", run.id, run.graph, run.status),
    });
    if let Some(from) = &run.resumed_from {
        handler.emit(OutputEvent::Info {
            message: format!("  resumed from {}", from),
        });
    }
    for record in &run.log.records {
        handler.emit(OutputEvent::node_complete(record));
    }
    for branch in &run.log.branches {
        handler.emit(OutputEvent::BranchComplete {
            parallel: branch.parallel.clone(),
            branch: branch.branch.clone(),
            status: branch.status,
        });
    }
    if let Some(error) = &run.error {
        handler.emit(OutputEvent::Info {
            message: format!("error: {}: {}", error.error, error.cause),
        });
    }
    if let Some(checkpoint) = &run.checkpoint {
        handler.emit(OutputEvent::Info {
            message: format!("checkpoint: {}", checkpoint.node),
        });
    }

    let success = run.status == RunStatus::Succeeded;
    handler.result(success, Some(run.context.as_value()));
    Ok(0)
}

/// List graphs in the search directories
pub fn list_graphs(project_dir: Option<&Path>, config: &StepflowConfig, handler: &dyn OutputHandler) -> Result<i32> {
    let graphs = find_graphs(project_dir, config)?;
    if graphs.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no graphs found)".into(),
        });
        return Ok(0);
    }

    for (name, path) in graphs {
        let description = load_graph_file(&path)
            .map(|g| g.description)
            .unwrap_or_else(|e| format!("(invalid: {:#})", e));
        handler.emit(OutputEvent::Info {
            message: format!("{} - {}", name, description),
        });
    }
    Ok(0)
}

/// List configured invocables
pub fn list_invocables(config: &StepflowConfig, handler: &dyn OutputHandler) {
    if config.invocables.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no invocables configured)".into(),
        });
        return;
    }

    let mut names: Vec<&String> = config.invocables.keys().collect();
    names.sort();
    for name in names {
        let invocable = &config.invocables[name];
        let enabled = if invocable.enabled { "✓" } else { "✗" };
        let kind = if invocable.is_http() { "http" } else { "command" };
        handler.emit(OutputEvent::Info {
            message: format!("{} {} ({}: {})", enabled, name, kind, invocable.command),
        });
    }
}

/// Parse `key=value` run arguments; values are JSON when they parse, else strings
pub fn parse_run_args(args: &[String]) -> Result<Map<String, Value>> {
    let mut parsed = Map::new();

    for arg in args {
        let (key, raw) = arg
            .split_once('=')
            .with_context(|| format!("argument '{}' is not key=value", arg))?;
        if key.is_empty() {
            anyhow::bail!("argument '{}' has an empty key", arg);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        parsed.insert(key.to_string(), value);
    }

    Ok(parsed)
}

fn read_input(path: &Path) -> Result<Map<String, Value>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    match serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} must contain a JSON object", path.display()),
    }
}

fn load_graph_source(
    graph_name: &str,
    project_dir: Option<&Path>,
    config: &StepflowConfig,
) -> Result<crate::config::GraphConfig> {
    load_graph(graph_name, project_dir, config)
        .with_context(|| format!("Failed to load graph '{}'", graph_name))
}

fn build_graph(graph_name: &str, project_dir: Option<&Path>, config: &StepflowConfig) -> Result<Arc<Graph>> {
    let graph_config = load_graph_source(graph_name, project_dir, config)?;
    Ok(Arc::new(Graph::build(&graph_config)?))
}

fn create_runner(config: &StepflowConfig) -> Result<WorkflowRunner> {
    let registry = InvocableRegistry::from_config(config)?;
    Ok(WorkflowRunner::new(registry)
        .with_default_timeout(Duration::from_secs(config.defaults.task_timeout)))
}

fn open_store(config: &StepflowConfig) -> Result<RunStore> {
    let path = match config.store_path()? {
        Some(path) => path,
        None => RunStore::default_path()?,
    };
    RunStore::open(&path)
}

/// Stream node completions until the run ends
async fn follow(handle: RunHandle, handler: &dyn OutputHandler) -> Result<ExecutionRun> {
    let mut updates = handle.subscribe();
    let mut reported = HashSet::new();
    let mut branches_seen = 0;

    loop {
        {
            let snapshot = updates.borrow_and_update();
            for record in newly_finished(&snapshot.records, &mut reported) {
                handler.emit(OutputEvent::node_complete(record));
            }
            for branch in snapshot.branches.iter().skip(branches_seen) {
                handler.emit(OutputEvent::BranchComplete {
                    parallel: branch.parallel.clone(),
                    branch: branch.branch.clone(),
                    status: branch.status,
                });
            }
            branches_seen = snapshot.branches.len();
        }
        if updates.changed().await.is_err() {
            break;
        }
    }

    let run = handle.wait().await?;
    for record in newly_finished(&run.log.records, &mut reported) {
        handler.emit(OutputEvent::node_complete(record));
    }
    Ok(run)
}

fn finish_run(run: &ExecutionRun, config: &StepflowConfig, handler: &dyn OutputHandler) -> Result<i32> {
    if config.defaults.store {
        match open_store(config).and_then(|store| store.save_run(run)) {
            Ok(()) => handler.emit(OutputEvent::Debug {
                message: format!("saved run {}", run.id),
            }),
            Err(e) => tracing::warn!(run_id = %run.id, error = %e, "failed to save run"),
        }
    }

    let success = run.status == RunStatus::Succeeded;
    handler.emit(OutputEvent::RunComplete {
        run_id: run.id.clone(),
        success,
        duration_ms: run.duration_ms(),
        nodes_completed: run.log.count(NodeStatus::Succeeded) + run.log.count(NodeStatus::Caught),
        error: run.error.as_ref().map(|e| format!("{}: {}", e.error, e.cause)),
    });
    handler.result(success, Some(run.context.as_value()));

    Ok(if success { 0 } else { 1 })
}
