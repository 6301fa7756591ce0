//! Parameter schema validation, including the implicit-schema merge for
//! autonomous blueprints.

use serde_json::{json, Value};

use crate::api::error::ValidationError;

/// Merges the implicit `{prompt: string, required}` schema into a custom
/// schema for autonomous blueprints: `prompt` is added to `properties` and to
/// `required` if not already declared.
pub fn merge_implicit_autonomous_schema(schema: &Value) -> Value {
    let mut merged = if schema.is_null() {
        json!({"type": "object", "properties": {}, "required": []})
    } else {
        schema.clone()
    };

    let obj = merged.as_object_mut().expect("schema must be an object");
    obj.entry("type").or_insert_with(|| json!("object"));

    let properties = obj
        .entry("properties")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .expect("properties must be an object");
    properties
        .entry("prompt")
        .or_insert_with(|| json!({"type": "string"}));

    let required = obj
        .entry("required")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .expect("required must be an array");
    if !required.iter().any(|v| v == "prompt") {
        required.push(json!("prompt"));
    }

    merged
}

/// Validates `parameters` against `schema`, returning structured errors in
/// the shape the wire contract expects.
pub fn validate(schema: &Value, parameters: &Value) -> Result<(), Vec<ValidationError>> {
    let compiled = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(err) => {
            return Err(vec![ValidationError {
                path: "".into(),
                message: format!("invalid parameters_schema: {err}"),
                schema_path: "".into(),
            }])
        }
    };

    let errors: Vec<ValidationError> = compiled
        .iter_errors(parameters)
        .map(|e| ValidationError {
            path: e.instance_path().to_string(),
            message: e.to_string(),
            schema_path: e.schema_path().to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_prompt_when_missing() {
        let schema = json!({"type": "object", "properties": {"n": {"type": "number"}}, "required": ["n"]});
        let merged = merge_implicit_autonomous_schema(&schema);
        assert_eq!(merged["required"], json!(["n", "prompt"]));
        assert_eq!(merged["properties"]["prompt"]["type"], json!("string"));
    }

    #[test]
    fn merge_is_idempotent_when_prompt_already_declared() {
        let schema = json!({
            "type": "object",
            "properties": {"prompt": {"type": "string", "minLength": 1}},
            "required": ["prompt"]
        });
        let merged = merge_implicit_autonomous_schema(&schema);
        assert_eq!(merged["required"], json!(["prompt"]));
        assert_eq!(merged["properties"]["prompt"]["minLength"], json!(1));
    }

    #[test]
    fn validate_rejects_missing_required_field() {
        let schema = json!({"type": "object", "properties": {"prompt": {"type": "string"}}, "required": ["prompt"]});
        let result = validate(&schema, &json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn validate_accepts_conforming_parameters() {
        let schema = json!({"type": "object", "properties": {"prompt": {"type": "string"}}, "required": ["prompt"]});
        let result = validate(&schema, &json!({"prompt": "hi"}));
        assert!(result.is_ok());
    }
}
