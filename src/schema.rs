//! Minimal hand-rolled JSON Schema subset validator.
//!
//! No JSON-Schema-validation crate appears anywhere in the pack this
//! engine was modeled on, and the teacher already had an idiom for
//! exactly this kind of structural check: direct `serde_json::Value`
//! inspection rather than pulling in a general-purpose validator. This
//! module generalizes that idiom to cover `type`, `required`,
//! `properties`, `enum`, and `items` -- the subset the Step Executor's
//! structured-output schema and the `SchemaValidatePlugin` actually
//! need, not a full draft implementation.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `value` against `schema`. Returns every violation found
/// rather than stopping at the first, so a caller can report (or retry
/// with) a complete correction list.
pub fn validate(value: &Value, schema: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_at("$", value, schema, &mut errors);
    errors
}

fn validate_at(path: &str, value: &Value, schema: &Value, errors: &mut Vec<ValidationError>) {
    let Value::Object(schema_obj) = schema else {
        return;
    };

    if let Some(expected_type) = schema_obj.get("type").and_then(|v| v.as_str()) {
        if !matches_type(value, expected_type) {
            errors.push(ValidationError {
                path: path.to_string(),
                message: format!("expected type '{expected_type}', got {}", type_name(value)),
            });
            return;
        }
    }

    if let Some(choices) = schema_obj.get("enum").and_then(|v| v.as_array()) {
        if !choices.contains(value) {
            errors.push(ValidationError {
                path: path.to_string(),
                message: format!("value not in enum: {value}"),
            });
        }
    }

    if let Value::Object(value_obj) = value {
        if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
            for key in required {
                if let Some(key) = key.as_str() {
                    if !value_obj.contains_key(key) || value_obj.get(key) == Some(&Value::Null) {
                        errors.push(ValidationError {
                            path: format!("{path}.{key}"),
                            message: "required property is missing or null".to_string(),
                        });
                    }
                }
            }
        }

        if let Some(Value::Object(properties)) = schema_obj.get("properties") {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = value_obj.get(key) {
                    validate_at(&format!("{path}.{key}"), sub_value, sub_schema, errors);
                }
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(item_schema) = schema_obj.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate_at(&format!("{path}[{i}]"), item, item_schema, errors);
            }
        }
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
