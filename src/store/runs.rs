//! SQLite-backed run history

use super::schema::init_schema;
use crate::config::ErrorInfo;
use crate::workflow::{Checkpoint, ExecutionRun, RunLog, RunStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

/// One line of run history
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub id: String,
    pub graph: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub current_node: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// Columns as stored, before JSON and timestamp decoding
struct StoredRun {
    id: String,
    graph: String,
    status: String,
    error: Option<String>,
    cause: Option<String>,
    current_node: Option<String>,
    checkpoint: Option<String>,
    context: String,
    log: String,
    resumed_from: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl StoredRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            graph: row.get(1)?,
            status: row.get(2)?,
            error: row.get(3)?,
            cause: row.get(4)?,
            current_node: row.get(5)?,
            checkpoint: row.get(6)?,
            context: row.get(7)?,
            log: row.get(8)?,
            resumed_from: row.get(9)?,
            started_at: row.get(10)?,
            finished_at: row.get(11)?,
        })
    }

    fn into_run(self) -> Result<ExecutionRun> {
        let checkpoint: Option<Checkpoint> = self
            .checkpoint
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(|| format!("Corrupt checkpoint for run {}", self.id))?;
        let log: RunLog = serde_json::from_str(&self.log)
            .with_context(|| format!("Corrupt log for run {}", self.id))?;

        Ok(ExecutionRun {
            status: parse_status(&self.status)?,
            context: serde_json::from_str(&self.context)
                .with_context(|| format!("Corrupt context for run {}", self.id))?,
            error: self.error.map(|error| ErrorInfo {
                error,
                cause: self.cause.unwrap_or_default(),
            }),
            started_at: parse_time(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_time).transpose()?,
            id: self.id,
            graph: self.graph,
            current_node: self.current_node,
            log,
            checkpoint,
            resumed_from: self.resumed_from,
        })
    }
}

fn parse_status(s: &str) -> Result<RunStatus> {
    s.parse::<RunStatus>().map_err(anyhow::Error::msg)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

/// Run history storage
pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open or create a run database
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open run database at {}", path.display()))?;

        init_schema(&conn)?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Default database path under the user config dir
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        let store_dir = config_dir.join("stepflow");
        std::fs::create_dir_all(&store_dir).with_context(|| {
            format!("Failed to create store directory at {}", store_dir.display())
        })?;

        Ok(store_dir.join("runs.db"))
    }

    /// Insert or replace a run
    pub fn save_run(&self, run: &ExecutionRun) -> Result<()> {
        let checkpoint = run
            .checkpoint
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let context = serde_json::to_string(&run.context)?;
        let log = serde_json::to_string(&run.log)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO runs (id, graph, status, error, cause, current_node, checkpoint, context, log, resumed_from, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.id,
                run.graph,
                run.status.as_str(),
                run.error.as_ref().map(|e| e.error.as_str()),
                run.error.as_ref().map(|e| e.cause.as_str()),
                run.current_node,
                checkpoint,
                context,
                log,
                run.resumed_from,
                run.started_at.to_rfc3339(),
                run.finished_at.map(|t| t.to_rfc3339()),
            ],
        )
        .with_context(|| format!("Failed to save run {}", run.id))?;

        tracing::debug!(run_id = %run.id, status = %run.status, "run saved");
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<ExecutionRun>> {
        let stored = self
            .conn
            .query_row(
                "SELECT id, graph, status, error, cause, current_node, checkpoint, context, log, resumed_from, started_at, finished_at
                 FROM runs WHERE id = ?1",
                [id],
                StoredRun::from_row,
            )
            .optional()?;

        stored.map(StoredRun::into_run).transpose()
    }

    /// Most recent runs first, optionally for one graph
    pub fn list_runs(&self, graph: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, graph, status, error, current_node, started_at, finished_at
             FROM runs
             WHERE ?1 IS NULL OR graph = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![graph, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, graph, status, error, current_node, started_at, finished_at)| {
                    Ok(RunSummary {
                        status: parse_status(&status)?,
                        started_at: parse_time(&started_at)?,
                        finished_at: finished_at.as_deref().map(parse_time).transpose()?,
                        id,
                        graph,
                        error,
                        current_node,
                    })
                },
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::workflow::NodeStatus;
    use serde_json::json;

    fn finished_run(graph: &str, status: RunStatus) -> ExecutionRun {
        let context = ExecutionContext::from_value(json!({"value": 15})).unwrap();
        let mut run = ExecutionRun::new(graph, context.clone());
        let idx = run.log.start("Check", "$", "choice");
        run.log.finish(idx, NodeStatus::Succeeded, 1, None);
        run.status = status;
        run.current_node = Some("Check".into());
        run.checkpoint = Some(Checkpoint {
            node: "Check".into(),
            context,
        });
        run.finished_at = Some(Utc::now());
        if status == RunStatus::Failed {
            run.error = Some(ErrorInfo {
                error: "TooLarge".into(),
                cause: "value 15 is too large".into(),
            });
        }
        run
    }

    #[test]
    fn test_save_and_get_run() {
        let store = RunStore::open_in_memory().unwrap();
        let run = finished_run("threshold", RunStatus::Failed);
        store.save_run(&run).unwrap();

        let loaded = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error, run.error);
        assert_eq!(loaded.context, run.context);
        assert_eq!(loaded.log, run.log);
        assert_eq!(loaded.checkpoint, run.checkpoint);
        assert_eq!(
            loaded.started_at.timestamp_millis(),
            run.started_at.timestamp_millis()
        );
    }

    #[test]
    fn test_get_missing_run() {
        let store = RunStore::open_in_memory().unwrap();
        assert!(store.get_run("nope").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces() {
        let store = RunStore::open_in_memory().unwrap();
        let mut run = finished_run("threshold", RunStatus::Running);
        run.finished_at = None;
        store.save_run(&run).unwrap();

        run.status = RunStatus::Succeeded;
        run.finished_at = Some(Utc::now());
        store.save_run(&run).unwrap();

        let runs = store.list_runs(None, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        assert!(runs[0].duration_ms().is_some());
    }

    #[test]
    fn test_list_runs_filter_and_limit() {
        let store = RunStore::open_in_memory().unwrap();
        for _ in 0..3 {
            store
                .save_run(&finished_run("threshold", RunStatus::Succeeded))
                .unwrap();
        }
        store
            .save_run(&finished_run("fanout", RunStatus::Failed))
            .unwrap();

        assert_eq!(store.list_runs(None, 10).unwrap().len(), 4);
        assert_eq!(store.list_runs(None, 2).unwrap().len(), 2);

        let fanout = store.list_runs(Some("fanout"), 10).unwrap();
        assert_eq!(fanout.len(), 1);
        assert_eq!(fanout[0].error.as_deref(), Some("TooLarge"));
        assert_eq!(fanout[0].current_node.as_deref(), Some("Check"));
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let run = finished_run("threshold", RunStatus::Succeeded);
        {
            let store = RunStore::open(&path).unwrap();
            store.save_run(&run).unwrap();
        }

        let reopened = RunStore::open(&path).unwrap();
        assert!(reopened.get_run(&run.id).unwrap().is_some());
    }
}
