//! Placeholder resolution: a pure walk over a blueprint's JSON, substituting
//! `${namespace.key}` references before the blueprint is frozen into a run.
//!
//! `serde_json::Value` already is the tagged variant the matching strategy
//! calls for (`Scalar | Array | Object`), so resolution works directly on it
//! rather than introducing a parallel representation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z0-9_.\-]+)\}").unwrap());

/// The namespaces a run's parameters, scope, the process environment and the
/// freshly generated ids are exposed under during resolution.
pub struct ResolutionContext<'a> {
    pub params: &'a Value,
    pub scope: &'a Value,
    pub session_id: &'a str,
    pub run_id: &'a str,
}

/// Resolves every placeholder reachable from `value`, returning a new tree.
/// Never mutates the input. `runner.*` placeholders and anything unresolvable
/// are left intact so the Runner can finish the job at execution time.
pub fn resolve(value: &Value, ctx: &ResolutionContext) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(input: &str, ctx: &ResolutionContext) -> Value {
    // A string that is *exactly* one placeholder resolves to the referenced
    // value's native type (a number stays a number). Anything else is string
    // interpolation with each match stringified in place.
    if let Some(caps) = PLACEHOLDER.captures(input) {
        if caps.get(0).unwrap().as_str() == input {
            if let Some(resolved) = lookup(&caps[1], &caps[2], ctx) {
                return resolved;
            }
            return Value::String(input.to_string());
        }
    }

    let mut out = String::with_capacity(input.len());
    let mut last_end = 0;
    for caps in PLACEHOLDER.captures_iter(input) {
        let whole = caps.get(0).unwrap();
        out.push_str(&input[last_end..whole.start()]);
        match lookup(&caps[1], &caps[2], ctx) {
            Some(Value::String(s)) => out.push_str(&s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(whole.as_str()),
        }
        last_end = whole.end();
    }
    out.push_str(&input[last_end..]);
    Value::String(out)
}

fn lookup(namespace: &str, key: &str, ctx: &ResolutionContext) -> Option<Value> {
    match namespace {
        "params" => dig(ctx.params, key),
        "scope" => dig(ctx.scope, key),
        "env" => std::env::var(key).ok().map(Value::String),
        "runtime" => match key {
            "session_id" => Some(Value::String(ctx.session_id.to_string())),
            "run_id" => Some(Value::String(ctx.run_id.to_string())),
            _ => None,
        },
        // Resolved by the Runner against its own identity, not here.
        "runner" => None,
        _ => None,
    }
}

fn dig(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_string_placeholder_preserves_type() {
        let params = json!({"count": 3});
        let scope = json!({});
        let ctx = ResolutionContext {
            params: &params,
            scope: &scope,
            session_id: "ses_1",
            run_id: "run_1",
        };
        let resolved = resolve(&json!("${params.count}"), &ctx);
        assert_eq!(resolved, json!(3));
    }

    #[test]
    fn embedded_placeholder_interpolates_as_string() {
        let params = json!({"name": "ada"});
        let scope = json!({});
        let ctx = ResolutionContext {
            params: &params,
            scope: &scope,
            session_id: "ses_1",
            run_id: "run_1",
        };
        let resolved = resolve(&json!("hello ${params.name}!"), &ctx);
        assert_eq!(resolved, json!("hello ada!"));
    }

    #[test]
    fn runner_namespace_passes_through_unresolved() {
        let params = json!({});
        let scope = json!({});
        let ctx = ResolutionContext {
            params: &params,
            scope: &scope,
            session_id: "ses_1",
            run_id: "run_1",
        };
        let resolved = resolve(&json!("${runner.identity}"), &ctx);
        assert_eq!(resolved, json!("${runner.identity}"));
    }

    #[test]
    fn unknown_placeholder_passes_through() {
        let params = json!({});
        let scope = json!({});
        let ctx = ResolutionContext {
            params: &params,
            scope: &scope,
            session_id: "ses_1",
            run_id: "run_1",
        };
        let resolved = resolve(&json!("${params.missing}"), &ctx);
        assert_eq!(resolved, json!("${params.missing}"));
    }

    #[test]
    fn resolution_is_pure_and_recurses_into_nested_structures() {
        let params = json!({"x": "y"});
        let scope = json!({});
        let ctx = ResolutionContext {
            params: &params,
            scope: &scope,
            session_id: "ses_1",
            run_id: "run_1",
        };
        let input = json!({"a": ["${params.x}", {"b": "${runtime.run_id}"}]});
        let resolved = resolve(&input, &ctx);
        assert_eq!(resolved, json!({"a": ["y", {"b": "run_1"}]}));
        assert_eq!(input, json!({"a": ["${params.x}", {"b": "${runtime.run_id}"}]}));
    }
}
