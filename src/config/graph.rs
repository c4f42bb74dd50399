//! Graph and node definitions as written in graph files

use crate::context::ParamValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node type - explicit, not inferred
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Invoke an external job or function
    Task,
    /// Write a literal or resolved value into the context
    Pass,
    /// Branch on predicates over context values
    Choice,
    /// Run branches concurrently and join
    Parallel,
    /// Terminate successfully
    Succeed,
    /// Terminate with an error
    Fail,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Task => "task",
            NodeType::Pass => "pass",
            NodeType::Choice => "choice",
            NodeType::Parallel => "parallel",
            NodeType::Succeed => "succeed",
            NodeType::Fail => "fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeType::Succeed | NodeType::Fail)
    }
}

/// Argument definition for a graph run
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ArgDef {
    /// Whether this argument is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    pub default: Option<serde_json::Value>,

    /// Description for help text
    #[serde(default)]
    pub description: String,
}

/// Retry rule for a task
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Error names this rule applies to (`*` for any)
    pub errors: Vec<String>,

    /// Retries after the first attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay in milliseconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Multiplier applied per retry
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,

    /// Upper bound on the delay in milliseconds
    pub max_delay: Option<u64>,

    /// Add up to 25% random jitter to each delay
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval() -> u64 {
    1000
}

fn default_backoff_rate() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            errors: vec!["*".into()],
            max_attempts: default_max_attempts(),
            interval: default_interval(),
            backoff_rate: default_backoff_rate(),
            max_delay: None,
            jitter: false,
        }
    }
}

/// Catch rule for a node
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CatchConfig {
    /// Error names this rule applies to (`*` for any)
    pub errors: Vec<String>,

    /// Node to continue at
    pub next: String,

    /// Where to write `{ error, cause }` before continuing
    pub result_path: Option<String>,

    /// Regex the error cause must match
    pub cause_matches: Option<String>,
}

/// One rule of a choice node; exactly one operator must be set
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChoiceRuleConfig {
    /// Context path the predicate reads
    pub variable: String,

    /// Node to continue at when the predicate matches
    pub next: String,

    pub numeric_equals: Option<f64>,
    pub numeric_less_than: Option<f64>,
    pub numeric_less_than_equals: Option<f64>,
    pub numeric_greater_than: Option<f64>,
    pub numeric_greater_than_equals: Option<f64>,
    pub string_equals: Option<String>,
    pub boolean_equals: Option<bool>,
    pub is_present: Option<bool>,
}

impl ChoiceRuleConfig {
    /// Number of operators set on this rule
    pub fn operator_count(&self) -> usize {
        [
            self.numeric_equals.is_some(),
            self.numeric_less_than.is_some(),
            self.numeric_less_than_equals.is_some(),
            self.numeric_greater_than.is_some(),
            self.numeric_greater_than_equals.is_some(),
            self.string_equals.is_some(),
            self.boolean_equals.is_some(),
            self.is_present.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// A branch of a parallel node: its own entry point and nodes
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    /// Branch name (unique within the parallel node)
    pub name: String,

    /// Where the branch output lands in the parent context
    pub result_path: String,

    /// Part of the branch's final context to export (defaults to all of it)
    pub output_path: Option<String>,

    /// Entry node of the branch
    pub start_at: String,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// Configuration for a graph node
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Node name (unique within the graph, branches included)
    pub name: String,

    /// Node type
    #[serde(rename = "type")]
    pub node_type: NodeType,

    /// Free-form note
    pub comment: Option<String>,

    /// Invocable to call (task nodes)
    pub invocable: Option<String>,

    /// Context path whose value is the task payload
    pub input_path: Option<String>,

    /// Parameter tree resolved into the task payload
    pub parameters: Option<ParamValue>,

    /// Value to write (pass nodes)
    pub result: Option<ParamValue>,

    /// Where the node output is written in the context
    pub result_path: Option<String>,

    /// Next node (all non-terminal types except choice)
    pub next: Option<String>,

    /// Timeout in milliseconds (task nodes)
    pub timeout: Option<u64>,

    /// Retry rules (task nodes)
    #[serde(default)]
    pub retry: Vec<RetryConfig>,

    /// Catch rules (non-terminal nodes)
    #[serde(default)]
    pub catch: Vec<CatchConfig>,

    /// Ordered predicate rules (choice nodes)
    #[serde(default)]
    pub choices: Vec<ChoiceRuleConfig>,

    /// Fallback when no choice rule matches
    pub default: Option<String>,

    /// Branches (parallel nodes)
    #[serde(default)]
    pub branches: Vec<BranchConfig>,

    /// Abort sibling branches on the first branch failure (parallel nodes)
    #[serde(default)]
    pub fail_fast: bool,

    /// Error name raised (fail nodes)
    pub error: Option<String>,

    /// Cause template (fail nodes)
    pub cause: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            node_type: NodeType::Succeed,
            comment: None,
            invocable: None,
            input_path: None,
            parameters: None,
            result: None,
            result_path: None,
            next: None,
            timeout: None,
            retry: Vec::new(),
            catch: Vec::new(),
            choices: Vec::new(),
            default: None,
            branches: Vec::new(),
            fail_fast: false,
            error: None,
            cause: None,
        }
    }
}

/// Full graph definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    /// Graph name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Graph version
    pub version: Option<u32>,

    /// Run arguments
    #[serde(default)]
    pub args: BTreeMap<String, ArgDef>,

    /// Run-level timeout in milliseconds
    pub timeout: Option<u64>,

    /// Entry node
    pub start_at: String,

    /// Nodes of the root scope
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl GraphConfig {
    /// Check per-node field requirements
    ///
    /// Structural checks (edges, cycles, paths) happen when the graph is
    /// built; this only looks at what each node type needs.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.start_at.is_empty() {
            errors.push("graph missing 'start_at' field".to_string());
        }
        check_nodes(&self.nodes, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Count of nodes across all scopes
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[NodeConfig]) -> usize {
            nodes
                .iter()
                .map(|n| 1 + n.branches.iter().map(|b| count(&b.nodes)).sum::<usize>())
                .sum()
        }
        count(&self.nodes)
    }
}

fn check_nodes(nodes: &[NodeConfig], errors: &mut Vec<String>) {
    for node in nodes {
        let kind = node.node_type.as_str();
        let missing = |field: &str| format!("{} node '{}' missing '{}' field", kind, node.name, field);
        let unexpected =
            |field: &str| format!("{} node '{}' does not take '{}'", kind, node.name, field);

        if node.name.is_empty() {
            errors.push(format!("{} node without a name", kind));
        }

        match node.node_type {
            NodeType::Task => {
                if node.invocable.is_none() {
                    errors.push(missing("invocable"));
                }
                if node.next.is_none() {
                    errors.push(missing("next"));
                }
                if node.input_path.is_some() && node.parameters.is_some() {
                    errors.push(format!(
                        "task node '{}' sets both 'input_path' and 'parameters'",
                        node.name
                    ));
                }
                for (idx, rule) in node.retry.iter().enumerate() {
                    if !rule.backoff_rate.is_finite() || rule.backoff_rate < 0.0 {
                        errors.push(format!(
                            "task node '{}' retry rule {} has invalid backoff_rate {}",
                            node.name, idx, rule.backoff_rate
                        ));
                    }
                }
            }
            NodeType::Pass => {
                if node.next.is_none() {
                    errors.push(missing("next"));
                }
                if node.result.is_some() && node.result_path.is_none() {
                    errors.push(missing("result_path"));
                }
            }
            NodeType::Choice => {
                if node.choices.is_empty() {
                    errors.push(missing("choices"));
                }
                if node.next.is_some() {
                    errors.push(unexpected("next"));
                }
                for (idx, rule) in node.choices.iter().enumerate() {
                    if rule.operator_count() != 1 {
                        errors.push(format!(
                            "choice node '{}' rule {} must set exactly one operator",
                            node.name, idx
                        ));
                    }
                }
            }
            NodeType::Parallel => {
                if node.branches.is_empty() {
                    errors.push(missing("branches"));
                }
                if node.next.is_none() {
                    errors.push(missing("next"));
                }
                for branch in &node.branches {
                    if branch.start_at.is_empty() {
                        errors.push(format!(
                            "branch '{}' of '{}' missing 'start_at' field",
                            branch.name, node.name
                        ));
                    }
                    check_nodes(&branch.nodes, errors);
                }
            }
            NodeType::Succeed | NodeType::Fail => {
                if node.next.is_some() {
                    errors.push(unexpected("next"));
                }
                if !node.catch.is_empty() {
                    errors.push(unexpected("catch"));
                }
                if node.node_type == NodeType::Fail && node.error.is_none() {
                    errors.push(missing("error"));
                }
            }
        }

        if node.node_type != NodeType::Task {
            if node.invocable.is_some() {
                errors.push(unexpected("invocable"));
            }
            if !node.retry.is_empty() {
                errors.push(unexpected("retry"));
            }
        }
        if node.node_type != NodeType::Parallel && !node.branches.is_empty() {
            errors.push(unexpected("branches"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_task() {
        let toml = r#"
            name = "Train"
            type = "task"
            invocable = "training-job"
            result_path = "model"
            next = "Evaluate"
            timeout = 60000

            [parameters]
            dataset = { ref = "dataset.uri" }
            epochs = 10

            [[retry]]
            errors = ["Timeout"]
            max_attempts = 2

            [[catch]]
            errors = ["*"]
            next = "NotifyFailure"
            result_path = "error"
        "#;
        let node: NodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(node.name, "Train");
        assert_eq!(node.node_type, NodeType::Task);
        assert_eq!(node.invocable, Some("training-job".into()));
        assert_eq!(node.timeout, Some(60000));
        assert_eq!(node.retry.len(), 1);
        assert_eq!(node.retry[0].interval, 1000);
        assert_eq!(node.catch[0].next, "NotifyFailure");
        assert!(node.parameters.is_some());
    }

    #[test]
    fn test_graph_config_with_parallel() {
        let toml = r#"
            name = "retrain"
            description = "Retrain and evaluate"
            start_at = "Fanout"

            [args.value]
            required = true

            [[nodes]]
            name = "Fanout"
            type = "parallel"
            next = "Done"

            [[nodes.branches]]
            name = "a"
            result_path = "branches.a"
            start_at = "TaskA"

            [[nodes.branches.nodes]]
            name = "TaskA"
            type = "task"
            invocable = "job-a"
            next = "EndA"

            [[nodes.branches.nodes]]
            name = "EndA"
            type = "succeed"

            [[nodes]]
            name = "Done"
            type = "succeed"
        "#;
        let graph: GraphConfig = toml::from_str(toml).unwrap();
        assert_eq!(graph.name, "retrain");
        assert!(graph.args["value"].required);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].branches[0].nodes.len(), 2);
        assert_eq!(graph.node_count(), 4);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            name = "x"
            type = "succeed"
            bogus = 1
        "#;
        assert!(toml::from_str::<NodeConfig>(toml).is_err());
    }

    #[test]
    fn test_graph_validation() {
        let graph = GraphConfig {
            name: "test".into(),
            start_at: "good".into(),
            nodes: vec![
                NodeConfig {
                    name: "good".into(),
                    node_type: NodeType::Task,
                    invocable: Some("job".into()),
                    next: Some("bad".into()),
                    ..Default::default()
                },
                NodeConfig {
                    name: "bad".into(),
                    node_type: NodeType::Task,
                    // Missing invocable and next
                    ..Default::default()
                },
                NodeConfig {
                    name: "pick".into(),
                    node_type: NodeType::Choice,
                    choices: vec![ChoiceRuleConfig {
                        variable: "value".into(),
                        next: "good".into(),
                        numeric_less_than: Some(10.0),
                        string_equals: Some("ten".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                NodeConfig {
                    name: "stop".into(),
                    node_type: NodeType::Fail,
                    next: Some("good".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let errors = graph.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("'bad' missing 'invocable'")));
        assert!(errors.iter().any(|e| e.contains("'bad' missing 'next'")));
        assert!(errors.iter().any(|e| e.contains("exactly one operator")));
        assert!(errors.iter().any(|e| e.contains("'stop' missing 'error'")));
        assert!(errors.iter().any(|e| e.contains("'stop' does not take 'next'")));
    }

    #[test]
    fn test_retry_backoff_rate_checked() {
        let task = |rate: f64| NodeConfig {
            name: "work".into(),
            node_type: NodeType::Task,
            invocable: Some("job".into()),
            next: Some("done".into()),
            retry: vec![RetryConfig {
                backoff_rate: rate,
                ..Default::default()
            }],
            ..Default::default()
        };
        let graph = |rate: f64| GraphConfig {
            name: "retry".into(),
            start_at: "work".into(),
            nodes: vec![task(rate)],
            ..Default::default()
        };

        assert!(graph(0.0).validate().is_ok());
        assert!(graph(1.5).validate().is_ok());
        for bad in [-2.0, f64::NAN, f64::INFINITY] {
            let errors = graph(bad).validate().unwrap_err();
            assert!(errors.iter().any(|e| e.contains("invalid backoff_rate")));
        }
    }
}
