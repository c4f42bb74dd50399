//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::workflow::{NodeRecord, NodeStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Parse from string
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "quiet" => Self::Quiet,
            _ => Self::Console,
        }
    }
}

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    RunStart {
        run_id: String,
        graph: String,
        nodes: usize,
    },
    NodeComplete {
        node: String,
        scope: String,
        kind: String,
        status: NodeStatus,
        attempts: u32,
        duration_ms: u64,
        error: Option<String>,
    },
    BranchComplete {
        parallel: String,
        branch: String,
        status: NodeStatus,
    },
    RunComplete {
        run_id: String,
        success: bool,
        duration_ms: u64,
        nodes_completed: usize,
        error: Option<String>,
    },
    RunError {
        error: String,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

impl OutputEvent {
    pub fn node_complete(record: &NodeRecord) -> Self {
        OutputEvent::NodeComplete {
            node: record.node.clone(),
            scope: record.scope.clone(),
            kind: record.kind.clone(),
            status: record.status,
            attempts: record.attempts,
            duration_ms: record.duration_ms().unwrap_or(0),
            error: record
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.error, e.cause)),
        }
    }
}

/// Records finished since the last call, in log order
pub fn newly_finished<'a>(records: &'a [NodeRecord], reported: &mut HashSet<usize>) -> Vec<&'a NodeRecord> {
    records
        .iter()
        .enumerate()
        .filter(|(idx, record)| record.finished_at.is_some() && reported.insert(*idx))
        .map(|(_, record)| record)
        .collect()
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write the final context
    fn result(&self, success: bool, context: Option<&Value>);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", ms as f64 / 1000.0)
        }
    }

    fn marker(status: NodeStatus) -> &'static str {
        match status {
            NodeStatus::Succeeded => "✓",
            NodeStatus::Failed => "✗",
            NodeStatus::Caught => "↪",
            NodeStatus::Pending | NodeStatus::Running => "…",
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::RunStart {
                run_id,
                graph,
                nodes,
            } => {
                eprintln!("Running graph '{}' ({} nodes) as {}", graph, nodes, run_id);
            }
            OutputEvent::NodeComplete {
                node,
                scope,
                kind,
                status,
                attempts,
                duration_ms,
                error,
            } => {
                let indent = if scope == "$" { "  " } else { "    " };
                let retries = if attempts > 1 {
                    format!(", {} attempts", attempts)
                } else {
                    String::new()
                };
                eprintln!(
                    "{}{} {} ({}, {}{})",
                    indent,
                    Self::marker(status),
                    node,
                    kind,
                    Self::format_duration(duration_ms),
                    retries
                );
                if let Some(error) = error {
                    eprintln!("{}    {}", indent, error);
                }
            }
            OutputEvent::BranchComplete {
                parallel,
                branch,
                status,
            } => {
                eprintln!("  {} {}.{}", Self::marker(status), parallel, branch);
            }
            OutputEvent::RunComplete {
                run_id,
                success,
                duration_ms,
                nodes_completed,
                error,
            } => {
                eprintln!();
                if success {
                    eprintln!(
                        "✓ Run {} succeeded ({} nodes in {})",
                        run_id,
                        nodes_completed,
                        Self::format_duration(duration_ms)
                    );
                } else {
                    eprintln!(
                        "✗ Run {} failed after {} nodes ({})",
                        run_id,
                        nodes_completed,
                        Self::format_duration(duration_ms)
                    );
                    if let Some(error) = error {
                        eprintln!("  {}", error);
                    }
                }
            }
            OutputEvent::RunError { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, _success: bool, context: Option<&Value>) {
        if let Some(Ok(s)) = context.map(serde_json::to_string_pretty) {
            println!("{}", s);
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        self.print_json(&event);
    }

    fn result(&self, success: bool, context: Option<&Value>) {
        #[derive(Serialize)]
        struct FinalResult<'a> {
            success: bool,
            context: Option<&'a Value>,
        }

        self.print_json(&FinalResult { success, context });
    }
}

/// Quiet handler that emits nothing
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}

    fn result(&self, _success: bool, context: Option<&Value>) {
        // Only the final context, compact
        if let Some(context) = context {
            println!("{}", context);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorInfo;
    use crate::workflow::RunLog;

    #[test]
    fn test_output_mode_from_str() {
        assert_eq!(OutputMode::from_str("json"), OutputMode::Json);
        assert_eq!(OutputMode::from_str("QUIET"), OutputMode::Quiet);
        assert_eq!(OutputMode::from_str("console"), OutputMode::Console);
        assert_eq!(OutputMode::from_str("unknown"), OutputMode::Console);
    }

    #[test]
    fn test_console_format_duration() {
        assert_eq!(ConsoleHandler::format_duration(500), "500ms");
        assert_eq!(ConsoleHandler::format_duration(1000), "1.0s");
        assert_eq!(ConsoleHandler::format_duration(2500), "2.5s");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = OutputEvent::BranchComplete {
            parallel: "Fan".into(),
            branch: "a".into(),
            status: NodeStatus::Succeeded,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BranchComplete");
        assert_eq!(json["status"], "succeeded");
    }

    #[test]
    fn test_node_complete_from_record() {
        let mut log = RunLog::default();
        let idx = log.start("TaskB", "Fan.b", "task");
        log.finish(
            idx,
            NodeStatus::Failed,
            3,
            Some(ErrorInfo {
                error: "TaskFailed".into(),
                cause: "broke".into(),
            }),
        );

        match OutputEvent::node_complete(&log.records[0]) {
            OutputEvent::NodeComplete {
                scope,
                attempts,
                error,
                ..
            } => {
                assert_eq!(scope, "Fan.b");
                assert_eq!(attempts, 3);
                assert_eq!(error.as_deref(), Some("TaskFailed: broke"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_newly_finished_reports_once() {
        let mut log = RunLog::default();
        let first = log.start("First", "$", "task");
        log.finish(first, NodeStatus::Succeeded, 1, None);
        log.start("Second", "$", "task");

        let mut reported = HashSet::new();
        let batch: Vec<&str> = newly_finished(&log.records, &mut reported)
            .iter()
            .map(|r| r.node.as_str())
            .collect();
        assert_eq!(batch, ["First"]);

        log.finish(1, NodeStatus::Succeeded, 1, None);
        let batch: Vec<&str> = newly_finished(&log.records, &mut reported)
            .iter()
            .map(|r| r.node.as_str())
            .collect();
        assert_eq!(batch, ["Second"]);
        assert!(newly_finished(&log.records, &mut reported).is_empty());
    }

    #[test]
    fn test_create_handler() {
        let _ = create_handler(OutputMode::Console, false);
        let _ = create_handler(OutputMode::Json, false);
        let _ = create_handler(OutputMode::Quiet, false);
    }
}
