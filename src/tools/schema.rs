//! JSON Schema for tool inputs: a small builder plus top-level validation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Input schema advertised to the model for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToolParameters {
    pub schema: Value,
}

impl AgentToolParameters {
    pub fn from_schema(schema: Value) -> Self {
        Self { schema }
    }

    /// Object schema with no properties.
    pub fn empty() -> Self {
        Self::object().build()
    }

    pub fn object() -> ParameterBuilder {
        ParameterBuilder::default()
    }

    /// Check `args` against the top level of the schema.
    ///
    /// Covers the object type, required keys and primitive property types;
    /// nested schemas are left to the tool itself.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let schema = &self.schema;
        if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
            return Err(format!("expected object input, got {}", type_name(args)));
        }
        let Some(obj) = args.as_object() else {
            return Ok(());
        };

        let required = schema.get("required").and_then(Value::as_array);
        for name in required.into_iter().flatten().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }

        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };
        for (key, value) in obj {
            let expected = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected {
                if !matches_type(value, expected) {
                    return Err(format!(
                        "field '{key}' expected {expected}, got {}",
                        type_name(value)
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Builder for object schemas.
#[derive(Debug, Default)]
pub struct ParameterBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({ "type": "string", "description": description }), required)
    }

    pub fn number(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({ "type": "number", "description": description }), required)
    }

    pub fn boolean(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({ "type": "boolean", "description": description }), required)
    }

    pub fn string_enum(self, name: &str, description: &str, values: &[&str], required: bool) -> Self {
        self.property(
            name,
            json!({ "type": "string", "description": description, "enum": values }),
            required,
        )
    }

    fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn build(self) -> AgentToolParameters {
        AgentToolParameters {
            schema: json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
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
