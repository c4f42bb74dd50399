//! Configuration loading with multi-layer merge

use super::{GraphConfig, InvocableConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level stepflow configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepflowConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,

    /// Invocable definitions
    #[serde(default)]
    pub invocables: HashMap<String, InvocableConfig>,
}

/// Global default settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Default task timeout in seconds
    #[serde(default = "default_task_timeout")]
    pub task_timeout: u64,

    /// Persist runs to the run store
    #[serde(default = "default_store")]
    pub store: bool,

    /// Run store location (defaults to the user config dir)
    pub store_path: Option<String>,

    /// Extra directories searched for graph files
    #[serde(default)]
    pub graph_dirs: Vec<String>,
}

fn default_task_timeout() -> u64 {
    300
}

fn default_store() -> bool {
    true
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            task_timeout: default_task_timeout(),
            store: default_store(),
            store_path: None,
            graph_dirs: Vec::new(),
        }
    }
}

impl StepflowConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/stepflow/config.toml
    /// 3. .stepflow/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(".stepflow/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".stepflow/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/stepflow/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stepflow/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.defaults.task_timeout != default_task_timeout() {
            self.defaults.task_timeout = other.defaults.task_timeout;
        }
        if !other.defaults.store {
            self.defaults.store = false;
        }
        if other.defaults.store_path.is_some() {
            self.defaults.store_path = other.defaults.store_path;
        }
        for dir in other.defaults.graph_dirs {
            if !self.defaults.graph_dirs.contains(&dir) {
                self.defaults.graph_dirs.push(dir);
            }
        }

        // Other wins for same key
        for (name, invocable) in other.invocables {
            self.invocables.insert(name, invocable);
        }
    }

    /// Get an invocable by name
    pub fn get_invocable(&self, name: &str) -> Option<&InvocableConfig> {
        self.invocables.get(name)
    }

    /// Get all enabled invocables
    pub fn enabled_invocables(&self) -> impl Iterator<Item = (&String, &InvocableConfig)> {
        self.invocables.iter().filter(|(_, i)| i.enabled)
    }

    /// Run store path with `~` and env vars expanded
    pub fn store_path(&self) -> Result<Option<PathBuf>> {
        self.defaults
            .store_path
            .as_deref()
            .map(expand_path)
            .transpose()
    }

    /// Directories searched for graph files, in priority order
    pub fn graph_dirs(&self, project_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
        let mut dirs_list = vec![
            project_dir
                .map(|p| p.join(".stepflow/graphs"))
                .unwrap_or_else(|| PathBuf::from(".stepflow/graphs")),
        ];
        if let Some(user_dir) = dirs::config_dir() {
            dirs_list.push(user_dir.join("stepflow/graphs"));
        }
        for raw in &self.defaults.graph_dirs {
            dirs_list.push(expand_path(raw)?);
        }
        Ok(dirs_list)
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("expanding path '{}'", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Load a graph definition
///
/// `name` may be a path to a `.toml` / `.json` file. Otherwise the search
/// order is (first match wins):
/// 1. .stepflow/graphs/{name}.toml|json (project)
/// 2. ~/.config/stepflow/graphs/{name}.toml|json (user)
/// 3. configured `graph_dirs`
pub fn load_graph(
    name: &str,
    project_dir: Option<&Path>,
    config: &StepflowConfig,
) -> Result<GraphConfig> {
    let direct = Path::new(name);
    if is_graph_file(direct) && direct.exists() {
        return load_graph_file(direct);
    }

    for dir in config.graph_dirs(project_dir)? {
        for ext in ["toml", "json"] {
            let candidate = dir.join(format!("{}.{}", name, ext));
            if candidate.exists() {
                return load_graph_file(&candidate);
            }
        }
    }

    anyhow::bail!("graph '{}' not found", name)
}

/// List graph names available in the search directories
pub fn list_graphs(project_dir: Option<&Path>, config: &StepflowConfig) -> Result<Vec<(String, PathBuf)>> {
    let mut found: Vec<(String, PathBuf)> = Vec::new();

    for dir in config.graph_dirs(project_dir)? {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_graph_file(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                // Earlier directories shadow later ones
                if !found.iter().any(|(name, _)| name == stem) {
                    found.push((stem.to_string(), path.clone()));
                }
            }
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn is_graph_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml") | Some("json")
    )
}

/// Parse and field-check a graph file
pub fn load_graph_file(path: &Path) -> Result<GraphConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let graph: GraphConfig = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    } else {
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    };

    graph.validate().map_err(|errors| {
        anyhow::anyhow!("graph validation failed:\n  {}", errors.join("\n  "))
    })?;

    Ok(graph)
}
