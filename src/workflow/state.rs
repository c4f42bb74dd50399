//! Run state: node records, checkpoints and the run itself

use crate::config::ErrorInfo;
use crate::context::ExecutionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a single node visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Failed, and a catch rule redirected flow
    Caught,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::Caught => "caught",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// One visit of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: String,

    /// `$` or `<parallel>.<branch>`
    pub scope: String,

    pub kind: String,
    pub status: NodeStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub error: Option<ErrorInfo>,
}

impl NodeRecord {
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// Terminal state of one branch of a parallel node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub parallel: String,
    pub branch: String,
    pub status: NodeStatus,
    pub error: Option<ErrorInfo>,
}

/// Per-node and per-branch status log of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub records: Vec<NodeRecord>,
    pub branches: Vec<BranchRecord>,
}

impl RunLog {
    /// Open a record in `Running` state; returns its index
    pub fn start(&mut self, node: &str, scope: &str, kind: &str) -> usize {
        self.records.push(NodeRecord {
            node: node.to_string(),
            scope: scope.to_string(),
            kind: kind.to_string(),
            status: NodeStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            attempts: 0,
            error: None,
        });
        self.records.len() - 1
    }

    pub fn finish(&mut self, idx: usize, status: NodeStatus, attempts: u32, error: Option<ErrorInfo>) {
        if let Some(record) = self.records.get_mut(idx) {
            record.status = status;
            record.finished_at = Some(Utc::now());
            record.attempts = attempts;
            record.error = error;
        }
    }

    /// Latest status of a node; never-visited nodes are `Pending`
    pub fn status_of(&self, node: &str) -> NodeStatus {
        self.records
            .iter()
            .rev()
            .find(|r| r.node == node)
            .map(|r| r.status)
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn branch_status(&self, parallel: &str, branch: &str) -> NodeStatus {
        self.branches
            .iter()
            .rev()
            .find(|b| b.parallel == parallel && b.branch == branch)
            .map(|b| b.status)
            .unwrap_or(NodeStatus::Pending)
    }

    /// Append a finished branch's log
    pub fn absorb(&mut self, other: RunLog) {
        self.records.extend(other.records);
        self.branches.extend(other.branches);
    }

    /// Close every record still open, as `Failed` with `error`
    pub fn fail_open(&mut self, error: &ErrorInfo) {
        for record in self.records.iter_mut().filter(|r| r.finished_at.is_none()) {
            record.status = NodeStatus::Failed;
            record.finished_at = Some(Utc::now());
            record.error = Some(error.clone());
        }
    }

    /// Number of visits that ended in each status
    pub fn count(&self, status: NodeStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

/// Where a run can be restarted from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Root-scope node to start at
    pub node: String,

    /// Context as it was when the node was entered
    pub context: ExecutionContext,
}

/// One walk of a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: String,
    pub graph: String,
    pub status: RunStatus,
    pub current_node: Option<String>,
    pub context: ExecutionContext,
    pub log: RunLog,

    /// Error that terminated the run
    pub error: Option<ErrorInfo>,

    pub checkpoint: Option<Checkpoint>,

    /// Run this one was resumed from
    pub resumed_from: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRun {
    pub fn new(graph: impl Into<String>, context: ExecutionContext) -> Self {
        let graph = graph.into();
        Self {
            id: generate_run_id(&graph),
            graph,
            status: RunStatus::Pending,
            current_node: None,
            context,
            log: RunLog::default(),
            error: None,
            checkpoint: None,
            resumed_from: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id.clone(),
            graph: self.graph.clone(),
            status: self.status,
            current_node: self.current_node.clone(),
            records: self.log.records.clone(),
            branches: self.log.branches.clone(),
        }
    }
}

/// Point-in-time view of a run in progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: String,
    pub graph: String,
    pub status: RunStatus,
    pub current_node: Option<String>,
    pub records: Vec<NodeRecord>,
    pub branches: Vec<BranchRecord>,
}

/// `<graph>-<timestamp>-<random hex>`
pub fn generate_run_id(graph: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: u32 = rand::random::<u32>() & 0xff_ffff;
    format!("{}-{}-{:06x}", graph, timestamp, suffix)
}
