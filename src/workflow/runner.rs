//! Graph walking: sequences, catch transitions and parallel fan-out

use super::executor::{Engine, choose, fail_error, run_pass, run_task};
use super::policy::select_catch;
use super::state::{
    BranchRecord, Checkpoint, ExecutionRun, NodeStatus, RunLog, RunSnapshot, RunStatus,
};
use crate::config::{ErrorInfo, ErrorKind, NodeError};
use crate::context::{ExecutionContext, MergeClaims};
use crate::graph::{Graph, GraphErrors, Node, NodeKind, ParallelNode, Scope};
use crate::invoker::InvocableRegistry;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Errors that stop a run from starting or being collected
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    InvalidGraph(#[from] GraphErrors),

    #[error("invocable '{name}' is not registered")]
    UnknownInvocable { name: String },

    #[error("missing required argument '{name}'")]
    MissingArgument { name: String },

    #[error("node '{node}' is not in the root scope")]
    UnknownNode { node: String },

    #[error("run task failed: {message}")]
    Join { message: String },
}

/// Mutable state of one walk: the root run or a single branch
struct Frame {
    run: ExecutionRun,

    /// Only the root scope keeps checkpoints
    root: bool,

    /// Run deadline and the budget it was derived from
    deadline: Option<(Instant, Duration)>,
    progress: Option<watch::Sender<RunSnapshot>>,
}

impl Frame {
    /// Frame for a branch: same run identity, private copy of the context
    fn branch(&self) -> Frame {
        let mut run = ExecutionRun::new(self.run.graph.clone(), self.run.context.clone());
        run.id = self.run.id.clone();
        run.status = RunStatus::Running;
        Frame {
            run,
            root: false,
            deadline: self.deadline,
            progress: None,
        }
    }

    fn enter(&mut self, node: &Node, scope: &str) -> usize {
        self.run.current_node = Some(node.name.clone());
        if self.root && !node.is_terminal() {
            self.run.checkpoint = Some(Checkpoint {
                node: node.name.clone(),
                context: self.run.context.clone(),
            });
        }
        let idx = self.run.log.start(&node.name, scope, node.type_name());
        self.publish();
        idx
    }

    fn finish(&mut self, idx: usize, status: NodeStatus, attempts: u32, error: Option<ErrorInfo>) {
        self.run.log.finish(idx, status, attempts, error);
        self.publish();
    }

    fn publish(&self) {
        if let Some(tx) = &self.progress {
            tx.send_replace(self.run.snapshot());
        }
    }

    fn check_deadline(&self, node: &str) -> Result<(), NodeError> {
        match self.deadline {
            Some((deadline, budget)) if Instant::now() >= deadline => Err(NodeError::new(
                ErrorKind::Timeout { elapsed: budget },
                node,
            )),
            _ => Ok(()),
        }
    }
}

/// Where a node sends control
enum Step<'a> {
    Next(&'a str, u32),
    End,
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NodeError>> + Send + 'a>>;

/// Walk a scope from `start` until a terminal node or an uncaught error
///
/// Boxed so parallel branches can recurse through spawned tasks.
fn walk_scope<'a>(
    engine: &'a Arc<Engine>,
    scope: &'a Scope,
    start: &'a str,
    frame: &'a mut Frame,
) -> WalkFuture<'a> {
    Box::pin(async move {
        let mut current = start;
        loop {
            let node = scope.node(current).ok_or_else(|| {
                NodeError::new(
                    ErrorKind::task_failed(format!(
                        "node '{}' not found in scope '{}'",
                        current, scope.label
                    )),
                    current,
                )
            })?;
            let idx = frame.enter(node, &scope.label);

            let outcome = if node.is_terminal() {
                step(engine, node, frame).await
            } else {
                match frame.check_deadline(&node.name) {
                    Ok(()) => step(engine, node, frame).await,
                    Err(e) => Err(e),
                }
            };

            match outcome {
                Ok(Step::Next(next, attempts)) => {
                    frame.finish(idx, NodeStatus::Succeeded, attempts, None);
                    current = next;
                }
                Ok(Step::End) => {
                    frame.finish(idx, NodeStatus::Succeeded, 1, None);
                    return Ok(());
                }
                Err(err) => {
                    let info = err.info();
                    let Some(rule) = select_catch(&node.catch, &err.kind) else {
                        tracing::error!(node = %node.name, scope = %scope.label, error = %err, "node failed");
                        frame.finish(idx, NodeStatus::Failed, err.attempt, Some(info));
                        return Err(err);
                    };

                    if let Some(path) = &rule.result_path {
                        let value = json!({ "error": info.error, "cause": info.cause });
                        if let Err(e) = frame.run.context.set(path, value) {
                            frame.finish(idx, NodeStatus::Failed, err.attempt, Some(info));
                            return Err(NodeError::new(e.into(), &node.name));
                        }
                    }

                    tracing::warn!(
                        node = %node.name,
                        error = %info.error,
                        next = %rule.next,
                        "error caught"
                    );
                    frame.finish(idx, NodeStatus::Caught, err.attempt, Some(info));
                    current = &rule.next;
                }
            }
        }
    })
}

async fn step<'a>(engine: &Arc<Engine>, node: &'a Node, frame: &mut Frame) -> Result<Step<'a>, NodeError> {
    let name = node.name.as_str();
    match &node.kind {
        NodeKind::Task(task) => {
            let attempts = run_task(engine, name, task, &mut frame.run.context).await?;
            Ok(Step::Next(&task.next, attempts))
        }
        NodeKind::Pass(pass) => {
            run_pass(pass, &mut frame.run.context).map_err(|e| NodeError::new(e.into(), name))?;
            Ok(Step::Next(&pass.next, 1))
        }
        NodeKind::Choice(choice) => {
            let next = choose(choice, &frame.run.context).map_err(|e| NodeError::new(e.into(), name))?;
            tracing::debug!(node = name, next, "choice taken");
            Ok(Step::Next(next, 1))
        }
        NodeKind::Parallel(parallel) => {
            run_parallel(engine, name, parallel, frame).await?;
            Ok(Step::Next(&parallel.next, 1))
        }
        NodeKind::Succeed => Ok(Step::End),
        NodeKind::Fail(fail) => Err(fail_error(engine, name, fail, &frame.run.context)),
    }
}

enum BranchOutcome {
    Finished(Frame, Result<(), NodeError>),
    Cancelled,
    Panicked(String),
}

/// Fork every branch, join them all, then merge outputs or fail
async fn run_parallel(
    engine: &Arc<Engine>,
    node: &str,
    parallel: &ParallelNode,
    frame: &mut Frame,
) -> Result<(), NodeError> {
    let mut tasks = JoinSet::new();
    let mut ids = HashMap::new();
    // Last published log of each branch, kept for branches that get aborted
    let mut progress = Vec::with_capacity(parallel.branches.len());

    for (idx, branch) in parallel.branches.iter().enumerate() {
        let mut branch_frame = frame.branch();
        let (tx, rx) = watch::channel(branch_frame.run.snapshot());
        branch_frame.progress = Some(tx);
        progress.push(rx);
        let engine = Arc::clone(engine);
        let scope = Arc::clone(&branch.scope);
        let handle = tasks.spawn(async move {
            let result = walk_scope(&engine, &scope, &scope.start_at, &mut branch_frame).await;
            (branch_frame, result)
        });
        ids.insert(handle.id(), idx);
    }
    tracing::debug!(node, branches = parallel.branches.len(), "branches forked");

    let mut outcomes: Vec<Option<BranchOutcome>> =
        parallel.branches.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, (branch_frame, result))) => (id, BranchOutcome::Finished(branch_frame, result)),
            Err(e) if e.is_cancelled() => (e.id(), BranchOutcome::Cancelled),
            Err(e) => (e.id(), BranchOutcome::Panicked(e.to_string())),
        };
        let failed = matches!(
            outcome,
            BranchOutcome::Finished(_, Err(_)) | BranchOutcome::Panicked(_)
        );
        if let Some(&idx) = ids.get(&id) {
            outcomes[idx] = Some(outcome);
        }
        if failed && parallel.fail_fast {
            tracing::debug!(node, "branch failed, aborting siblings");
            tasks.abort_all();
        }
    }

    let mut first_error: Option<ErrorKind> = None;
    let mut outputs = Vec::new();
    for ((branch, outcome), seen) in parallel.branches.iter().zip(outcomes).zip(&progress) {
        let (status, error) = match outcome.unwrap_or(BranchOutcome::Cancelled) {
            BranchOutcome::Finished(branch_frame, Ok(())) => {
                frame.run.log.absorb(branch_frame.run.log);
                outputs.push((branch, branch_frame.run.context));
                (NodeStatus::Succeeded, None)
            }
            BranchOutcome::Finished(branch_frame, Err(err)) => {
                frame.run.log.absorb(branch_frame.run.log);
                let info = err.info();
                first_error.get_or_insert(err.kind);
                (NodeStatus::Failed, Some(info))
            }
            BranchOutcome::Cancelled => {
                let info = ErrorInfo {
                    error: "Cancelled".into(),
                    cause: "cancelled".into(),
                };
                let mut log = {
                    let seen = seen.borrow();
                    RunLog {
                        records: seen.records.clone(),
                        branches: seen.branches.clone(),
                    }
                };
                log.fail_open(&info);
                frame.run.log.absorb(log);
                (NodeStatus::Failed, Some(info))
            }
            BranchOutcome::Panicked(message) => {
                let kind = ErrorKind::task_failed(format!("branch '{}' panicked: {}", branch.name, message));
                let info = ErrorInfo {
                    error: kind.name().to_string(),
                    cause: kind.cause(),
                };
                first_error.get_or_insert(kind);
                (NodeStatus::Failed, Some(info))
            }
        };
        frame.run.log.branches.push(BranchRecord {
            parallel: node.to_string(),
            branch: branch.name.clone(),
            status,
            error,
        });
    }
    frame.publish();

    if let Some(kind) = first_error {
        return Err(NodeError::new(kind, node));
    }

    // Merge into a copy so a collision leaves the parent context untouched
    let mut merged = frame.run.context.clone();
    let mut claims = MergeClaims::new();
    for (branch, context) in outputs {
        let output = context
            .get(&branch.output_path)
            .map_err(|e| NodeError::new(e.into(), node))?
            .clone();
        merged
            .merge(output, &branch.result_path, &branch.name, &mut claims)
            .map_err(|e| NodeError::new(e.into(), node))?;
    }
    frame.run.context = merged;
    Ok(())
}

async fn execute(
    engine: Arc<Engine>,
    graph: Arc<Graph>,
    run: ExecutionRun,
    start: String,
    progress: watch::Sender<RunSnapshot>,
) -> ExecutionRun {
    let deadline = graph.timeout.map(|t| (Instant::now() + t, t));
    let mut frame = Frame {
        run,
        root: true,
        deadline,
        progress: Some(progress),
    };
    tracing::info!(run_id = %frame.run.id, graph = %graph.name, start = %start, "run started");

    let result = walk_scope(&engine, &graph.root, &start, &mut frame).await;

    let run = &mut frame.run;
    run.finished_at = Some(chrono::Utc::now());
    match result {
        Ok(()) => {
            run.status = RunStatus::Succeeded;
            tracing::info!(run_id = %run.id, duration_ms = run.duration_ms(), "run succeeded");
        }
        Err(err) => {
            run.status = RunStatus::Failed;
            tracing::error!(run_id = %run.id, error = %err, "run failed");
            run.error = Some(err.info());
        }
    }
    frame.publish();
    frame.run
}

/// A run in progress
#[derive(Debug)]
pub struct RunHandle {
    id: String,
    snapshots: watch::Receiver<RunSnapshot>,
    task: JoinHandle<ExecutionRun>,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published state
    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every node transition
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.clone()
    }

    pub async fn wait(self) -> Result<ExecutionRun, WorkflowError> {
        self.task.await.map_err(|e| WorkflowError::Join {
            message: e.to_string(),
        })
    }
}

/// Executes validated graphs against a set of invocables
#[derive(Debug, Clone)]
pub struct WorkflowRunner {
    engine: Arc<Engine>,
}

impl WorkflowRunner {
    pub fn new(registry: InvocableRegistry) -> Self {
        Self {
            engine: Arc::new(Engine::new(registry)),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        Arc::make_mut(&mut self.engine).default_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &InvocableRegistry {
        &self.engine.registry
    }

    fn check_invocables(&self, graph: &Graph) -> Result<(), WorkflowError> {
        match graph
            .invocables()
            .into_iter()
            .find(|name| !self.engine.registry.contains(name))
        {
            Some(name) => Err(WorkflowError::UnknownInvocable {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Initial context: provided args, then defaults; required args must be present
    fn prepare(&self, graph: &Graph, mut args: Map<String, Value>) -> Result<ExecutionContext, WorkflowError> {
        self.check_invocables(graph)?;
        for (name, def) in &graph.args {
            if args.contains_key(name) {
                continue;
            }
            match &def.default {
                Some(default) => {
                    args.insert(name.clone(), default.clone());
                }
                None if def.required => {
                    return Err(WorkflowError::MissingArgument { name: name.clone() });
                }
                None => {}
            }
        }
        Ok(ExecutionContext::from_input(args))
    }

    fn spawn(&self, graph: Arc<Graph>, mut run: ExecutionRun, start: String) -> RunHandle {
        run.status = RunStatus::Running;
        let (tx, rx) = watch::channel(run.snapshot());
        let id = run.id.clone();
        let engine = Arc::clone(&self.engine);
        let task = tokio::spawn(execute(engine, graph, run, start, tx));
        RunHandle {
            id,
            snapshots: rx,
            task,
        }
    }

    /// Spawn a run and return immediately
    pub fn start(&self, graph: Arc<Graph>, args: Map<String, Value>) -> Result<RunHandle, WorkflowError> {
        let context = self.prepare(&graph, args)?;
        let run = ExecutionRun::new(graph.name.clone(), context);
        let start = graph.root.start_at.clone();
        Ok(self.spawn(graph, run, start))
    }

    /// Run to completion
    pub async fn run(&self, graph: Arc<Graph>, args: Map<String, Value>) -> Result<ExecutionRun, WorkflowError> {
        self.start(graph, args)?.wait().await
    }

    /// Start a new run from a checkpoint of an earlier one
    pub fn resume(
        &self,
        graph: Arc<Graph>,
        checkpoint: Checkpoint,
        resumed_from: Option<String>,
    ) -> Result<RunHandle, WorkflowError> {
        if graph.root.node(&checkpoint.node).is_none() {
            return Err(WorkflowError::UnknownNode {
                node: checkpoint.node,
            });
        }
        self.check_invocables(&graph)?;

        let mut run = ExecutionRun::new(graph.name.clone(), checkpoint.context);
        run.resumed_from = resumed_from;
        tracing::info!(run_id = %run.id, from = ?run.resumed_from, node = %checkpoint.node, "resuming");
        Ok(self.spawn(graph, run, checkpoint.node))
    }
}
