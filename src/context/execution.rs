//! The mutable JSON context threaded through a run

use super::path::KeyPath;
use crate::config::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors reading or writing the context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("path collision at {path}: written by branches '{first}' and '{second}'")]
    PathCollision {
        path: String,
        first: String,
        second: String,
    },

    #[error("cannot write '{path}': '{at}' is not a mapping")]
    NotAMapping { path: String, at: String },
}

impl From<ContextError> for ErrorKind {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::PathNotFound { path } => ErrorKind::PathNotFound { path },
            ContextError::PathCollision { path, .. } => ErrorKind::PathCollision { path },
            ContextError::NotAMapping { path, at } => ErrorKind::PathNotFound {
                path: format!("{} (blocked at '{}')", path, at),
            },
        }
    }
}

/// Result paths already written during one Parallel fan-in, by branch
#[derive(Debug, Default)]
pub struct MergeClaims {
    claims: Vec<(KeyPath, String)>,
}

impl MergeClaims {
    pub fn new() -> Self {
        Self::default()
    }

    fn conflict(&self, path: &KeyPath, branch: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|(claimed, owner)| owner != branch && claimed.overlaps(path))
            .map(|(_, owner)| owner.as_str())
    }
}

/// Execution context: a JSON mapping addressed by key paths
///
/// Mutation is append/overwrite only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    root: Value,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial context from a flat run input mapping
    pub fn from_input(input: Map<String, Value>) -> Self {
        Self {
            root: Value::Object(input),
        }
    }

    /// Wrap an existing value; the root must be a mapping
    pub fn from_value(value: Value) -> Result<Self, ContextError> {
        if value.is_object() {
            Ok(Self { root: value })
        } else {
            Err(ContextError::NotAMapping {
                path: "$".into(),
                at: "$".into(),
            })
        }
    }

    /// Read the value at `path`
    pub fn get(&self, path: &KeyPath) -> Result<&Value, ContextError> {
        let mut current = &self.root;
        for segment in path.segments() {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| ContextError::PathNotFound {
                path: path.to_string(),
            })?;
        }
        Ok(current)
    }

    pub fn contains(&self, path: &KeyPath) -> bool {
        self.get(path).is_ok()
    }

    /// Write `value` at `path`, creating intermediate mappings
    pub fn set(&mut self, path: &KeyPath, value: Value) -> Result<(), ContextError> {
        let Some((last, parents)) = path.segments().split_last() else {
            if !value.is_object() {
                return Err(ContextError::NotAMapping {
                    path: "$".into(),
                    at: "$".into(),
                });
            }
            self.root = value;
            return Ok(());
        };

        let mut current = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let map = match current {
                Value::Object(map) => map,
                _ => {
                    return Err(ContextError::NotAMapping {
                        path: path.to_string(),
                        at: path.prefix_string(depth),
                    });
                }
            };
            current = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        match current {
            Value::Object(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            _ => Err(ContextError::NotAMapping {
                path: path.to_string(),
                at: path.prefix_string(parents.len()),
            }),
        }
    }

    /// Write a branch's output subtree at `at`, replacing whatever was there
    ///
    /// Fails with `PathCollision` if `at` overlaps a path already claimed by a
    /// different branch of the same fan-in; nothing is written in that case.
    pub fn merge(
        &mut self,
        subtree: Value,
        at: &KeyPath,
        branch: &str,
        claims: &mut MergeClaims,
    ) -> Result<(), ContextError> {
        if let Some(owner) = claims.conflict(at, branch) {
            return Err(ContextError::PathCollision {
                path: at.to_string(),
                first: owner.to_string(),
                second: branch.to_string(),
            });
        }

        self.set(at, subtree)?;
        claims.claims.push((at.clone(), branch.to_string()));
        Ok(())
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Owned copy of the whole context
    pub fn snapshot(&self) -> Value {
        self.root.clone()
    }

    pub fn into_value(self) -> Value {
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> KeyPath {
        KeyPath::parse(raw).unwrap()
    }

    fn context(value: Value) -> ExecutionContext {
        ExecutionContext::from_value(value).unwrap()
    }

    #[test]
    fn test_get_nested_and_indexed() {
        let ctx = context(json!({"job": {"metrics": [0.5, 0.9]}, "value": 5}));
        assert_eq!(ctx.get(&path("value")).unwrap(), &json!(5));
        assert_eq!(ctx.get(&path("job.metrics.1")).unwrap(), &json!(0.9));
        assert_eq!(ctx.get(&path("$")).unwrap(), ctx.as_value());
    }

    #[test]
    fn test_get_missing_path() {
        let ctx = context(json!({"value": 5}));
        let err = ctx.get(&path("value.inner")).unwrap_err();
        assert_eq!(
            err,
            ContextError::PathNotFound {
                path: "value.inner".into()
            }
        );
        assert!(!ctx.contains(&path("missing")));
    }

    #[test]
    fn test_set_creates_intermediate_mappings() {
        let mut ctx = ExecutionContext::new();
        ctx.set(&path("a.b.c"), json!(1)).unwrap();
        assert_eq!(ctx.as_value(), &json!({"a": {"b": {"c": 1}}}));

        // Overwrite keeps siblings
        ctx.set(&path("a.d"), json!("x")).unwrap();
        ctx.set(&path("a.b.c"), json!(2)).unwrap();
        assert_eq!(ctx.as_value(), &json!({"a": {"b": {"c": 2}, "d": "x"}}));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut ctx = context(json!({"value": 5}));
        let err = ctx.set(&path("value.inner"), json!(1)).unwrap_err();
        assert!(matches!(err, ContextError::NotAMapping { ref at, .. } if at == "value"));
    }

    #[test]
    fn test_set_root_requires_mapping() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.set(&KeyPath::root(), json!(3)).is_err());
        ctx.set(&KeyPath::root(), json!({"fresh": true})).unwrap();
        assert_eq!(ctx.as_value(), &json!({"fresh": true}));
    }

    #[test]
    fn test_merge_disjoint_branches() {
        let mut ctx = context(json!({"value": 5}));
        let mut claims = MergeClaims::new();

        ctx.merge(json!({"score": 0.9}), &path("branches.a"), "a", &mut claims)
            .unwrap();
        ctx.merge(json!({"score": 0.7}), &path("branches.b"), "b", &mut claims)
            .unwrap();

        assert_eq!(
            ctx.as_value(),
            &json!({
                "value": 5,
                "branches": {"a": {"score": 0.9}, "b": {"score": 0.7}}
            })
        );
    }

    #[test]
    fn test_merge_collision_between_branches() {
        let mut ctx = ExecutionContext::new();
        let mut claims = MergeClaims::new();

        ctx.merge(json!({"x": 1}), &path("out"), "a", &mut claims)
            .unwrap();
        let err = ctx
            .merge(json!(2), &path("out.x"), "b", &mut claims)
            .unwrap_err();

        assert!(matches!(err, ContextError::PathCollision { ref first, ref second, .. }
            if first == "a" && second == "b"));
        // Nothing from the rejected branch was written
        assert_eq!(ctx.get(&path("out.x")).unwrap(), &json!(1));
    }

    #[test]
    fn test_merge_same_branch_may_overwrite() {
        let mut ctx = ExecutionContext::new();
        let mut claims = MergeClaims::new();
        ctx.merge(json!(1), &path("out"), "a", &mut claims).unwrap();
        ctx.merge(json!(2), &path("out"), "a", &mut claims).unwrap();
        assert_eq!(ctx.get(&path("out")).unwrap(), &json!(2));
    }

    #[test]
    fn test_merge_replaces_existing_scalar() {
        let mut ctx = context(json!({"resultA": "placeholder", "value": 5}));
        let mut claims = MergeClaims::new();
        ctx.merge(json!({"score": 1}), &path("resultA"), "a", &mut claims)
            .unwrap();
        assert_eq!(
            ctx.as_value(),
            &json!({"resultA": {"score": 1}, "value": 5})
        );
    }

    #[test]
    fn test_merge_drops_stale_keys() {
        let mut ctx = context(json!({"out": {"stale": true, "score": 0}}));
        let mut claims = MergeClaims::new();
        ctx.merge(json!({"score": 3}), &path("out"), "a", &mut claims)
            .unwrap();
        assert_eq!(ctx.get(&path("out")).unwrap(), &json!({"score": 3}));
    }

    #[test]
    fn test_context_error_maps_to_error_kind() {
        let kind: ErrorKind = ContextError::PathNotFound {
            path: "value".into(),
        }
        .into();
        assert_eq!(kind.name(), "PathNotFound");
    }
}
