//! Tagged parameter values: literals and context references

use super::execution::{ContextError, ExecutionContext};
use super::path::{KeyPath, PathError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A reference to a context path, written `{ ref = "dataset.uri" }`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextRef {
    #[serde(rename = "ref")]
    pub path: String,
}

/// Parameter tree as written in a graph definition
///
/// A mapping whose only key is `ref` is a reference; anything else nests or
/// passes through as a literal.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Reference(ContextRef),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
    Literal(Value),
}

impl ParamValue {
    /// Parse every reference path, producing the form the executor resolves
    pub fn compile(&self) -> Result<Param, PathError> {
        Ok(match self {
            ParamValue::Reference(r) => Param::Reference(KeyPath::parse(&r.path)?),
            ParamValue::List(items) => Param::List(
                items
                    .iter()
                    .map(ParamValue::compile)
                    .collect::<Result<_, _>>()?,
            ),
            ParamValue::Map(entries) => Param::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.compile()?)))
                    .collect::<Result<_, PathError>>()?,
            ),
            ParamValue::Literal(value) => Param::Literal(value.clone()),
        })
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::Literal(value)
    }
}

/// Compiled parameter tree; every leaf is a literal or a parsed reference
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Literal(Value),
    Reference(KeyPath),
    List(Vec<Param>),
    Map(BTreeMap<String, Param>),
}

impl Param {
    /// Resolve references against the context
    pub fn resolve(&self, ctx: &ExecutionContext) -> Result<Value, ContextError> {
        Ok(match self {
            Param::Literal(value) => value.clone(),
            Param::Reference(path) => ctx.get(path)?.clone(),
            Param::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(ctx))
                    .collect::<Result<_, _>>()?,
            ),
            Param::Map(entries) => {
                let mut map = Map::new();
                for (key, param) in entries {
                    map.insert(key.clone(), param.resolve(ctx)?);
                }
                Value::Object(map)
            }
        })
    }

    /// Collect every referenced path
    pub fn references<'a>(&'a self, out: &mut Vec<&'a KeyPath>) {
        match self {
            Param::Literal(_) => {}
            Param::Reference(path) => out.push(path),
            Param::List(items) => items.iter().for_each(|item| item.references(out)),
            Param::Map(entries) => entries.values().for_each(|param| param.references(out)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Holder {
        parameters: ParamValue,
    }

    #[test]
    fn test_deserialize_tagged_tree_from_toml() {
        let toml = r#"
            [parameters]
            bucket = "models"
            epochs = 3
            value = { ref = "value" }
            tags = ["nightly", { ref = "run.tag" }]
            nested = { uri = { ref = "dataset.uri" }, format = "csv" }
        "#;
        let holder: Holder = toml::from_str(toml).unwrap();
        let ParamValue::Map(entries) = &holder.parameters else {
            panic!("expected map, got {:?}", holder.parameters);
        };

        assert_eq!(entries["bucket"], ParamValue::Literal(json!("models")));
        assert_eq!(
            entries["value"],
            ParamValue::Reference(ContextRef {
                path: "value".into()
            })
        );
        assert!(matches!(entries["tags"], ParamValue::List(_)));
        assert!(matches!(entries["nested"], ParamValue::Map(_)));
    }

    #[test]
    fn test_map_with_extra_keys_is_not_a_reference() {
        let value: ParamValue = serde_json::from_value(json!({"ref": "a", "other": 1})).unwrap();
        assert!(matches!(value, ParamValue::Map(_)));
    }

    #[test]
    fn test_resolve_mixed_tree() {
        let raw: ParamValue = serde_json::from_value(json!({
            "bucket": "models",
            "value": {"ref": "value"},
            "uris": [{"ref": "dataset.uri"}, "s3://fixed"]
        }))
        .unwrap();
        let param = raw.compile().unwrap();

        let ctx = ExecutionContext::from_value(json!({
            "value": 5,
            "dataset": {"uri": "s3://data/train.csv"}
        }))
        .unwrap();

        assert_eq!(
            param.resolve(&ctx).unwrap(),
            json!({
                "bucket": "models",
                "value": 5,
                "uris": ["s3://data/train.csv", "s3://fixed"]
            })
        );

        let mut refs = Vec::new();
        param.references(&mut refs);
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_resolve_missing_reference() {
        let param = ParamValue::Reference(ContextRef {
            path: "missing".into(),
        })
        .compile()
        .unwrap();
        let err = param.resolve(&ExecutionContext::new()).unwrap_err();
        assert!(matches!(err, ContextError::PathNotFound { .. }));
    }

    #[test]
    fn test_compile_rejects_bad_path() {
        let raw = ParamValue::Reference(ContextRef {
            path: "a..b".into(),
        });
        assert!(raw.compile().is_err());
    }
}
