//! Custom template filters

use minijinja::value::Value;
use minijinja::{Error, ErrorKind, State};

/// Register all custom filters with a minijinja Environment
pub fn register_filters(env: &mut minijinja::Environment) {
    env.add_filter("shell_escape", filter_shell_escape);
    env.add_filter("json", filter_json);
    env.add_filter("join", filter_join);
    env.add_filter("default", filter_default);
    env.add_filter("trim", filter_trim);
}

/// Quote a string for a shell command line
///
/// `it's` becomes `'it'\''s'`; plain words pass through unquoted.
fn filter_shell_escape(_state: &State, value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '='));
    if plain {
        return Ok(Value::from(s));
    }

    let mut escaped = String::with_capacity(s.len() + 2);
    escaped.push('\'');
    escaped.push_str(&s.replace('\'', "'\\''"));
    escaped.push('\'');
    Ok(Value::from(escaped))
}

/// Serialize a value to compact JSON
fn filter_json(_state: &State, value: Value) -> Result<Value, Error> {
    serde_json::to_string(&value)
        .map(Value::from)
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("JSON serialization failed: {}", e),
            )
        })
}

/// Join a sequence with a separator (`,` by default)
fn filter_join(_state: &State, value: Value, sep: Option<Value>) -> Result<Value, Error> {
    let separator = sep.as_ref().and_then(|v| v.as_str()).unwrap_or(",");
    if value.is_undefined() || value.is_none() {
        return Ok(Value::from(""));
    }

    match value.try_iter() {
        Ok(iter) => {
            let parts: Vec<String> = iter.map(|v| v.to_string()).collect();
            Ok(Value::from(parts.join(separator)))
        }
        Err(_) => Ok(Value::from(value.to_string())),
    }
}

/// Fallback for undefined, null or empty-string values
fn filter_default(_state: &State, value: Value, default: Value) -> Result<Value, Error> {
    let empty = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(|s| s.is_empty());
    Ok(if empty { default } else { value })
}

fn filter_trim(_state: &State, value: Value) -> Result<Value, Error> {
    Ok(Value::from(value.to_string().trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::Environment;

    fn render(template: &str, ctx: Value) -> String {
        let mut env = Environment::new();
        register_filters(&mut env);
        env.add_template("test", template).unwrap();
        env.get_template("test").unwrap().render(ctx).unwrap()
    }

    #[test]
    fn test_shell_escape_plain() {
        let result = render(
            "{{ uri | shell_escape }}",
            minijinja::context! { uri => "s3://bucket/train.csv" },
        );
        assert_eq!(result, "s3://bucket/train.csv");
    }

    #[test]
    fn test_shell_escape_quotes_and_spaces() {
        let result = render(
            "{{ note | shell_escape }}",
            minijinja::context! { note => "it's done" },
        );
        assert_eq!(result, "'it'\\''s done'");

        let result = render(
            "{{ cmd | shell_escape }}",
            minijinja::context! { cmd => "$(rm -rf /)" },
        );
        assert_eq!(result, "'$(rm -rf /)'");
    }

    #[test]
    fn test_json_filter() {
        let value = Value::from_serialize(serde_json::json!({"accuracy": 0.91}));
        let result = render("{{ metrics | json }}", minijinja::context! { metrics => value });
        assert_eq!(result, r#"{"accuracy":0.91}"#);
    }

    #[test]
    fn test_join_filter() {
        let result = render(
            "{{ tags | join }}|{{ tags | join(' ') }}",
            minijinja::context! { tags => vec!["nightly", "gpu"] },
        );
        assert_eq!(result, "nightly,gpu|nightly gpu");
    }

    #[test]
    fn test_default_filter() {
        let result = render(
            "{{ missing | default('none') }}/{{ blank | default('none') }}/{{ set | default('none') }}",
            minijinja::context! { blank => "", set => "v2" },
        );
        assert_eq!(result, "none/none/v2");
    }

    #[test]
    fn test_trim_filter() {
        let result = render("{{ value | trim }}", minijinja::context! { value => "  ok \n" });
        assert_eq!(result, "ok");
    }
}
