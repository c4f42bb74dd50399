//! Typed, immutable workflow graph

use crate::config::ArgDef;
use crate::context::{KeyPath, Param};
use crate::workflow::{Backoff, ErrorMatcher};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// A validated workflow graph
///
/// Built once by [`Graph::build`](super::Graph::build) and never mutated.
#[derive(Debug)]
pub struct Graph {
    pub name: String,
    pub description: String,
    pub args: BTreeMap<String, ArgDef>,
    pub timeout: Option<Duration>,
    pub root: Arc<Scope>,
}

impl Graph {
    /// Find a node anywhere in the graph
    pub fn find_node(&self, name: &str) -> Option<&Node> {
        self.root.find_node(name)
    }

    /// Names of every invocable a task node calls
    pub fn invocables(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.root.collect_invocables(&mut names);
        names
    }

    /// All node names, depth-first in declaration order
    pub fn node_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.root.collect_names(&mut names);
        names
    }
}

/// A set of nodes with one entry point: the root, or a parallel branch
#[derive(Debug)]
pub struct Scope {
    /// `$` for the root, `<parallel>.<branch>` for branches
    pub label: String,
    pub start_at: String,
    pub nodes: Vec<Node>,
}

impl Scope {
    /// Look up a node in this scope only
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Look up a node in this scope or any nested branch
    pub fn find_node(&self, name: &str) -> Option<&Node> {
        for node in &self.nodes {
            if node.name == name {
                return Some(node);
            }
            if let NodeKind::Parallel(parallel) = &node.kind {
                for branch in &parallel.branches {
                    if let Some(found) = branch.scope.find_node(name) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    fn collect_invocables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Task(task) => {
                    out.insert(task.invocable.as_str());
                }
                NodeKind::Parallel(parallel) => {
                    for branch in &parallel.branches {
                        branch.scope.collect_invocables(out);
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        for node in &self.nodes {
            out.push(&node.name);
            if let NodeKind::Parallel(parallel) = &node.kind {
                for branch in &parallel.branches {
                    branch.scope.collect_names(out);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub catch: Vec<CatchRule>,
}

impl Node {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, NodeKind::Succeed | NodeKind::Fail(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Task(_) => "task",
            NodeKind::Pass(_) => "pass",
            NodeKind::Choice(_) => "choice",
            NodeKind::Parallel(_) => "parallel",
            NodeKind::Succeed => "succeed",
            NodeKind::Fail(_) => "fail",
        }
    }

    /// Outgoing edges within the node's scope
    pub fn edges(&self) -> Vec<&str> {
        let mut edges: Vec<&str> = match &self.kind {
            NodeKind::Task(task) => vec![task.next.as_str()],
            NodeKind::Pass(pass) => vec![pass.next.as_str()],
            NodeKind::Parallel(parallel) => vec![parallel.next.as_str()],
            NodeKind::Choice(choice) => choice
                .rules
                .iter()
                .map(|r| r.next.as_str())
                .chain(std::iter::once(choice.default.as_str()))
                .collect(),
            NodeKind::Succeed | NodeKind::Fail(_) => Vec::new(),
        };
        edges.extend(self.catch.iter().map(|c| c.next.as_str()));
        edges
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Task(TaskNode),
    Pass(PassNode),
    Choice(ChoiceNode),
    Parallel(ParallelNode),
    Succeed,
    Fail(FailNode),
}

/// How a task builds its payload
#[derive(Debug)]
pub enum InputSelector {
    /// The whole context
    Context,
    /// The value at a path
    Path(KeyPath),
    /// A parameter tree resolved against the context
    Parameters(Param),
}

#[derive(Debug)]
pub struct TaskNode {
    pub invocable: String,
    pub input: InputSelector,
    pub result_path: Option<KeyPath>,
    pub next: String,
    pub timeout: Option<Duration>,
    pub retry: Vec<RetryRule>,
}

#[derive(Debug)]
pub struct PassNode {
    pub result: Option<Param>,
    pub result_path: Option<KeyPath>,
    pub next: String,
}

#[derive(Debug)]
pub struct ChoiceNode {
    pub rules: Vec<ChoiceRule>,
    pub default: String,
}

#[derive(Debug)]
pub struct ChoiceRule {
    pub variable: KeyPath,
    pub predicate: Predicate,
    pub next: String,
}

/// Comparison applied to a context value
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    NumericEquals(f64),
    NumericLessThan(f64),
    NumericLessThanEquals(f64),
    NumericGreaterThan(f64),
    NumericGreaterThanEquals(f64),
    StringEquals(String),
    BooleanEquals(bool),
    IsPresent(bool),
}

impl Predicate {
    /// Existence checks are the only predicates that accept a missing value
    pub fn needs_value(&self) -> bool {
        !matches!(self, Predicate::IsPresent(_))
    }

    /// Evaluate against a value; type mismatches never match
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let number = || value.and_then(Value::as_f64);
        match self {
            Predicate::IsPresent(expected) => value.is_some() == *expected,
            Predicate::NumericEquals(rhs) => number().is_some_and(|v| v == *rhs),
            Predicate::NumericLessThan(rhs) => number().is_some_and(|v| v < *rhs),
            Predicate::NumericLessThanEquals(rhs) => number().is_some_and(|v| v <= *rhs),
            Predicate::NumericGreaterThan(rhs) => number().is_some_and(|v| v > *rhs),
            Predicate::NumericGreaterThanEquals(rhs) => number().is_some_and(|v| v >= *rhs),
            Predicate::StringEquals(rhs) => value.and_then(Value::as_str) == Some(rhs.as_str()),
            Predicate::BooleanEquals(rhs) => value.and_then(Value::as_bool) == Some(*rhs),
        }
    }
}

#[derive(Debug)]
pub struct ParallelNode {
    pub branches: Vec<Branch>,
    pub next: String,
    pub fail_fast: bool,
}

#[derive(Debug)]
pub struct Branch {
    pub name: String,
    pub result_path: KeyPath,
    pub output_path: KeyPath,
    pub scope: Arc<Scope>,
}

#[derive(Debug)]
pub struct FailNode {
    pub error: String,
    /// minijinja template rendered against the context
    pub cause: Option<String>,
}

#[derive(Debug)]
pub struct CatchRule {
    pub matcher: ErrorMatcher,
    pub next: String,
    pub result_path: Option<KeyPath>,
}

#[derive(Debug)]
pub struct RetryRule {
    pub matcher: ErrorMatcher,
    pub backoff: Backoff,
}
