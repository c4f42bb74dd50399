//! Graph construction and build-time validation
//!
//! Turns a [`GraphConfig`] into an immutable [`Graph`], collecting every
//! structural problem instead of stopping at the first one.

use super::model::*;
use crate::config::{CatchConfig, GraphConfig, NodeConfig, NodeType};
use crate::context::{KeyPath, PathError};
use crate::template::TemplateEngine;
use crate::workflow::{Backoff, ErrorMatcher};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A structural problem found while building a graph
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Per-node field requirement not met
    #[error("{0}")]
    InvalidField(String),

    #[error("node '{node}' missing '{field}' field")]
    MissingField { node: String, field: String },

    #[error("duplicate node name '{node}'")]
    DuplicateNode { node: String },

    #[error("node '{from}' in scope '{scope}' targets unknown node '{target}'")]
    UnknownNode {
        scope: String,
        from: String,
        target: String,
    },

    #[error("choice node '{node}' has no default branch")]
    MissingDefaultBranch { node: String },

    #[error("cycle detected at node '{node}' in scope '{scope}'")]
    CycleDetected { scope: String, node: String },

    #[error("node '{node}' is unreachable from '{start}'")]
    UnreachableNode { node: String, start: String },

    #[error("parallel node '{node}': branch result paths '{first}' and '{second}' overlap")]
    PathCollision {
        node: String,
        first: String,
        second: String,
    },

    #[error("node '{node}': {source}")]
    InvalidPath {
        node: String,
        #[source]
        source: PathError,
    },

    #[error("node '{node}': invalid cause pattern: {message}")]
    InvalidPattern { node: String, message: String },

    #[error("node '{node}': invalid cause template: {message}")]
    InvalidTemplate { node: String, message: String },

    #[error("node '{node}' reads '{path}', which no argument or node writes")]
    UnresolvedReference { node: String, path: String },
}

/// Every error found while building a graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphErrors(pub Vec<GraphError>);

impl fmt::Display for GraphErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph validation failed:")?;
        for error in &self.0 {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphErrors {}

impl GraphErrors {
    pub fn errors(&self) -> &[GraphError] {
        &self.0
    }
}

impl Graph {
    /// Build and validate a graph from its definition
    pub fn build(config: &GraphConfig) -> Result<Self, GraphErrors> {
        if let Err(messages) = config.validate() {
            return Err(GraphErrors(
                messages.into_iter().map(GraphError::InvalidField).collect(),
            ));
        }

        let mut errors = Vec::new();
        check_unique_names(&config.nodes, &mut HashSet::new(), &mut errors);

        let root = build_scope("$", &config.start_at, &config.nodes, &mut errors);
        if !errors.is_empty() {
            return Err(GraphErrors(errors));
        }

        check_scope(&root, &mut errors);
        check_references(config, &root, &mut errors);
        if !errors.is_empty() {
            return Err(GraphErrors(errors));
        }

        Ok(Graph {
            name: config.name.clone(),
            description: config.description.clone(),
            args: config.args.clone(),
            timeout: config.timeout.map(Duration::from_millis),
            root: Arc::new(root),
        })
    }
}

fn check_unique_names<'a>(
    nodes: &'a [NodeConfig],
    seen: &mut HashSet<&'a str>,
    errors: &mut Vec<GraphError>,
) {
    for node in nodes {
        if !seen.insert(node.name.as_str()) {
            errors.push(GraphError::DuplicateNode {
                node: node.name.clone(),
            });
        }
        let mut branch_names = HashSet::new();
        for branch in &node.branches {
            if !branch_names.insert(branch.name.as_str()) {
                errors.push(GraphError::InvalidField(format!(
                    "parallel node '{}' has duplicate branch '{}'",
                    node.name, branch.name
                )));
            }
            check_unique_names(&branch.nodes, seen, errors);
        }
    }
}

fn build_scope(
    label: &str,
    start_at: &str,
    configs: &[NodeConfig],
    errors: &mut Vec<GraphError>,
) -> Scope {
    let nodes = configs
        .iter()
        .filter_map(|config| build_node(config, errors))
        .collect();
    Scope {
        label: label.to_string(),
        start_at: start_at.to_string(),
        nodes,
    }
}

fn build_node(config: &NodeConfig, errors: &mut Vec<GraphError>) -> Option<Node> {
    let result = build_kind(config, errors).and_then(|kind| {
        let catch = config
            .catch
            .iter()
            .map(|rule| build_catch(&config.name, rule))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Node {
            name: config.name.clone(),
            kind,
            catch,
        })
    });

    match result {
        Ok(node) => Some(node),
        Err(e) => {
            errors.push(e);
            None
        }
    }
}

fn build_kind(config: &NodeConfig, errors: &mut Vec<GraphError>) -> Result<NodeKind, GraphError> {
    let name = config.name.as_str();
    let required = |field: &str, value: &Option<String>| {
        value.clone().ok_or_else(|| GraphError::MissingField {
            node: name.to_string(),
            field: field.to_string(),
        })
    };

    let kind = match config.node_type {
        NodeType::Task => {
            let input = match (&config.input_path, &config.parameters) {
                (Some(raw), _) => InputSelector::Path(parse_path(name, raw)?),
                (None, Some(params)) => {
                    InputSelector::Parameters(params.compile().map_err(|e| invalid_path(name, e))?)
                }
                (None, None) => InputSelector::Context,
            };
            let retry = config
                .retry
                .iter()
                .map(|rule| {
                    Ok(RetryRule {
                        matcher: build_matcher(name, &rule.errors, None)?,
                        backoff: Backoff::from_config(rule),
                    })
                })
                .collect::<Result<Vec<_>, GraphError>>()?;

            NodeKind::Task(TaskNode {
                invocable: required("invocable", &config.invocable)?,
                input,
                result_path: optional_path(name, &config.result_path)?,
                next: required("next", &config.next)?,
                timeout: config.timeout.map(Duration::from_millis),
                retry,
            })
        }
        NodeType::Pass => NodeKind::Pass(PassNode {
            result: config
                .result
                .as_ref()
                .map(|r| r.compile())
                .transpose()
                .map_err(|e| invalid_path(name, e))?,
            result_path: optional_path(name, &config.result_path)?,
            next: required("next", &config.next)?,
        }),
        NodeType::Choice => {
            let default = config
                .default
                .clone()
                .ok_or_else(|| GraphError::MissingDefaultBranch {
                    node: name.to_string(),
                })?;
            let mut rules = Vec::with_capacity(config.choices.len());
            for rule in &config.choices {
                let predicate = predicate_for(rule).ok_or_else(|| {
                    GraphError::InvalidField(format!(
                        "choice node '{}' rule for '{}' has no operator",
                        name, rule.variable
                    ))
                })?;
                rules.push(ChoiceRule {
                    variable: parse_path(name, &rule.variable)?,
                    predicate,
                    next: rule.next.clone(),
                });
            }
            NodeKind::Choice(ChoiceNode { rules, default })
        }
        NodeType::Parallel => {
            let mut branches: Vec<Branch> = Vec::with_capacity(config.branches.len());
            for branch in &config.branches {
                let result_path = parse_path(name, &branch.result_path)?;
                let output_path = optional_path(name, &branch.output_path)?.unwrap_or_default();

                for other in &branches {
                    if other.result_path.overlaps(&result_path) {
                        return Err(GraphError::PathCollision {
                            node: name.to_string(),
                            first: other.result_path.to_string(),
                            second: result_path.to_string(),
                        });
                    }
                }

                let label = format!("{}.{}", name, branch.name);
                let scope = build_scope(&label, &branch.start_at, &branch.nodes, errors);
                branches.push(Branch {
                    name: branch.name.clone(),
                    result_path,
                    output_path,
                    scope: Arc::new(scope),
                });
            }
            NodeKind::Parallel(ParallelNode {
                branches,
                next: required("next", &config.next)?,
                fail_fast: config.fail_fast,
            })
        }
        NodeType::Succeed => NodeKind::Succeed,
        NodeType::Fail => {
            if let Some(cause) = &config.cause {
                TemplateEngine::new()
                    .validate(cause)
                    .map_err(|e| GraphError::InvalidTemplate {
                        node: name.to_string(),
                        message: e.to_string(),
                    })?;
            }
            NodeKind::Fail(FailNode {
                error: required("error", &config.error)?,
                cause: config.cause.clone(),
            })
        }
    };

    Ok(kind)
}

fn predicate_for(rule: &crate::config::ChoiceRuleConfig) -> Option<Predicate> {
    if let Some(v) = rule.numeric_equals {
        return Some(Predicate::NumericEquals(v));
    }
    if let Some(v) = rule.numeric_less_than {
        return Some(Predicate::NumericLessThan(v));
    }
    if let Some(v) = rule.numeric_less_than_equals {
        return Some(Predicate::NumericLessThanEquals(v));
    }
    if let Some(v) = rule.numeric_greater_than {
        return Some(Predicate::NumericGreaterThan(v));
    }
    if let Some(v) = rule.numeric_greater_than_equals {
        return Some(Predicate::NumericGreaterThanEquals(v));
    }
    if let Some(v) = &rule.string_equals {
        return Some(Predicate::StringEquals(v.clone()));
    }
    if let Some(v) = rule.boolean_equals {
        return Some(Predicate::BooleanEquals(v));
    }
    rule.is_present.map(Predicate::IsPresent)
}

fn build_catch(node: &str, rule: &CatchConfig) -> Result<CatchRule, GraphError> {
    Ok(CatchRule {
        matcher: build_matcher(node, &rule.errors, rule.cause_matches.as_deref())?,
        next: rule.next.clone(),
        result_path: optional_path(node, &rule.result_path)?,
    })
}

fn build_matcher(
    node: &str,
    names: &[String],
    cause: Option<&str>,
) -> Result<ErrorMatcher, GraphError> {
    if names.is_empty() {
        return Err(GraphError::InvalidField(format!(
            "node '{}' has an error rule with no error names",
            node
        )));
    }
    ErrorMatcher::new(names.to_vec(), cause).map_err(|e| GraphError::InvalidPattern {
        node: node.to_string(),
        message: e.to_string(),
    })
}

fn parse_path(node: &str, raw: &str) -> Result<KeyPath, GraphError> {
    KeyPath::parse(raw).map_err(|e| invalid_path(node, e))
}

fn optional_path(node: &str, raw: &Option<String>) -> Result<Option<KeyPath>, GraphError> {
    raw.as_deref().map(|r| parse_path(node, r)).transpose()
}

fn invalid_path(node: &str, source: PathError) -> GraphError {
    GraphError::InvalidPath {
        node: node.to_string(),
        source,
    }
}

/// Edge targets, cycles and reachability, per scope
fn check_scope(scope: &Scope, errors: &mut Vec<GraphError>) {
    let mut edges_ok = true;
    if scope.node(&scope.start_at).is_none() {
        edges_ok = false;
        errors.push(GraphError::UnknownNode {
            scope: scope.label.clone(),
            from: "start_at".into(),
            target: scope.start_at.clone(),
        });
    }
    for node in &scope.nodes {
        for target in node.edges() {
            if scope.node(target).is_none() {
                edges_ok = false;
                errors.push(GraphError::UnknownNode {
                    scope: scope.label.clone(),
                    from: node.name.clone(),
                    target: target.to_string(),
                });
            }
        }
    }

    if edges_ok {
        if let Err(e) = detect_cycles(scope) {
            errors.push(e);
        }
        for node in unreachable_nodes(scope) {
            errors.push(GraphError::UnreachableNode {
                node: node.to_string(),
                start: scope.start_at.clone(),
            });
        }
    }

    for node in &scope.nodes {
        if let NodeKind::Parallel(parallel) = &node.kind {
            for branch in &parallel.branches {
                check_scope(&branch.scope, errors);
            }
        }
    }
}

/// Depth-first search with an in-progress set; any back edge is a cycle
fn detect_cycles(scope: &Scope) -> Result<(), GraphError> {
    let edges: HashMap<&str, Vec<&str>> = scope
        .nodes
        .iter()
        .map(|n| (n.name.as_str(), n.edges()))
        .collect();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        scope: &Scope,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
    ) -> Result<(), GraphError> {
        if visited.contains(node) {
            return Ok(());
        }
        if in_progress.contains(node) {
            return Err(GraphError::CycleDetected {
                scope: scope.label.clone(),
                node: node.to_string(),
            });
        }

        in_progress.insert(node);
        if let Some(targets) = edges.get(node) {
            for target in targets {
                visit(*target, scope, edges, visited, in_progress)?;
            }
        }
        in_progress.remove(node);
        visited.insert(node);

        Ok(())
    }

    for node in &scope.nodes {
        visit(&node.name, scope, &edges, &mut visited, &mut in_progress)?;
    }
    Ok(())
}

fn unreachable_nodes(scope: &Scope) -> Vec<&str> {
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::from([scope.start_at.as_str()]);

    while let Some(name) = queue.pop_front() {
        if !reached.insert(name) {
            continue;
        }
        if let Some(node) = scope.node(name) {
            queue.extend(node.edges());
        }
    }

    scope
        .nodes
        .iter()
        .map(|n| n.name.as_str())
        .filter(|name| !reached.contains(name))
        .collect()
}

/// Every path a node reads must start at a declared arg or at a key some
/// node writes
fn check_references(config: &GraphConfig, root: &Scope, errors: &mut Vec<GraphError>) {
    let mut written: HashSet<String> = config.args.keys().cloned().collect();
    let mut writes_root = false;
    collect_writes(root, &mut written, &mut writes_root);
    if writes_root {
        return;
    }

    let mut reads = Vec::new();
    collect_reads(root, &mut reads);
    for (node, path) in reads {
        let known = path.first().is_none_or(|first| written.contains(first));
        if !known {
            errors.push(GraphError::UnresolvedReference {
                node: node.to_string(),
                path: path.to_string(),
            });
        }
    }
}

fn collect_writes(scope: &Scope, written: &mut HashSet<String>, writes_root: &mut bool) {
    let mut record = |path: &KeyPath| match path.first() {
        Some(first) => {
            written.insert(first.to_string());
        }
        None => *writes_root = true,
    };

    for node in &scope.nodes {
        match &node.kind {
            NodeKind::Task(task) => task.result_path.iter().for_each(&mut record),
            NodeKind::Pass(pass) => pass.result_path.iter().for_each(&mut record),
            NodeKind::Parallel(parallel) => {
                for branch in &parallel.branches {
                    record(&branch.result_path);
                }
            }
            NodeKind::Choice(_) | NodeKind::Succeed | NodeKind::Fail(_) => {}
        }
        for rule in &node.catch {
            rule.result_path.iter().for_each(&mut record);
        }
    }

    for node in &scope.nodes {
        if let NodeKind::Parallel(parallel) = &node.kind {
            for branch in &parallel.branches {
                collect_writes(&branch.scope, written, writes_root);
            }
        }
    }
}

fn collect_reads<'a>(scope: &'a Scope, reads: &mut Vec<(&'a str, &'a KeyPath)>) {
    for node in &scope.nodes {
        let mut paths: Vec<&KeyPath> = Vec::new();
        match &node.kind {
            NodeKind::Task(task) => match &task.input {
                InputSelector::Context => {}
                InputSelector::Path(path) => paths.push(path),
                InputSelector::Parameters(param) => param.references(&mut paths),
            },
            NodeKind::Pass(pass) => {
                if let Some(param) = &pass.result {
                    param.references(&mut paths);
                }
            }
            NodeKind::Choice(choice) => paths.extend(
                choice
                    .rules
                    .iter()
                    .filter(|r| r.predicate.needs_value())
                    .map(|r| &r.variable),
            ),
            NodeKind::Parallel(parallel) => {
                for branch in &parallel.branches {
                    collect_reads(&branch.scope, reads);
                }
            }
            NodeKind::Succeed | NodeKind::Fail(_) => {}
        }
        reads.extend(paths.into_iter().map(|p| (node.name.as_str(), p)));
    }
}
