//! JSON-shape parameter validation.
//!
//! Schemas are plain JSON objects with `type`, `properties`, and
//! `required`. Validation checks shape only: a value is accepted or
//! rejected by its JSON type, never parsed or converted by value. Strict
//! mode additionally rejects properties the schema does not declare.

use serde_json::Value;

/// Validate `params` against an object schema.
///
/// # Errors
/// Returns a human-readable description of the first violation found.
pub fn validate(schema: &Value, params: &Value, strict: bool) -> Result<(), String> {
    let schema_type = schema.get("type").and_then(Value::as_str).unwrap_or("object");
    check_value(schema_type, schema, params, "$", strict)
}

fn check_value(
    schema_type: &str,
    schema: &Value,
    value: &Value,
    path: &str,
    strict: bool,
) -> Result<(), String> {
    match schema_type {
        "object" => check_object(schema, value, path, strict),
        "array" => check_array(schema, value, path, strict),
        "string" => {
            if value.is_string() {
                check_enum(schema, value, path)
            } else {
                Err(type_error(path, "string", value))
            }
        }
        "number" => {
            if value.is_number() {
                Ok(())
            } else {
                Err(type_error(path, "number", value))
            }
        }
        "integer" => {
            if value.is_i64() || value.is_u64() {
                Ok(())
            } else {
                Err(type_error(path, "integer", value))
            }
        }
        "boolean" => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(type_error(path, "boolean", value))
            }
        }
        // Unknown declared types accept anything; the schema author owns them.
        _ => Ok(()),
    }
}

fn check_object(schema: &Value, value: &Value, path: &str, strict: bool) -> Result<(), String> {
    let Some(obj) = value.as_object() else {
        return Err(type_error(path, "object", value));
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("{path}: missing required property '{name}'"));
            }
        }
    }

    if strict && let Some(props) = properties {
        for key in obj.keys() {
            if !props.contains_key(key) {
                return Err(format!("{path}: unknown property '{key}'"));
            }
        }
    }

    if let Some(props) = properties {
        for (key, prop_schema) in props {
            if let Some(prop_value) = obj.get(key) {
                let prop_type = prop_schema
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("any");
                let child_path = format!("{path}.{key}");
                check_value(prop_type, prop_schema, prop_value, &child_path, strict)?;
            }
        }
    }

    Ok(())
}

fn check_array(schema: &Value, value: &Value, path: &str, strict: bool) -> Result<(), String> {
    let Some(items) = value.as_array() else {
        return Err(type_error(path, "array", value));
    };

    if let Some(item_schema) = schema.get("items") {
        let item_type = item_schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("any");
        for (i, item) in items.iter().enumerate() {
            let child_path = format!("{path}[{i}]");
            check_value(item_type, item_schema, item, &child_path, strict)?;
        }
    }

    Ok(())
}

fn check_enum(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        return Err(format!(
            "{path}: value {value} not one of the allowed variants"
        ));
    }
    Ok(())
}

fn type_error(path: &str, expected: &str, value: &Value) -> String {
    let actual = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("{path}: expected {expected}, got {actual}")
}
