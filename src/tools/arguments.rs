//! Typed access to the arguments a model passed to a tool.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RelayError, Result};

/// Parsed tool-call input.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Arguments from the raw text a model streamed; blank text means `{}`.
    pub fn from_raw(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new(Value::Object(Default::default())));
        }
        serde_json::from_str(trimmed)
            .map(Self::new)
            .map_err(|e| RelayError::InvalidArgument(format!("malformed tool input: {e}")))
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.value
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| missing("number", key))
    }

    pub fn get_bool_opt(&self, key: &str) -> Option<bool> {
        self.value.get(key).and_then(Value::as_bool)
    }

    /// Deserialize the whole argument object into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| RelayError::InvalidArgument(format!("invalid tool input: {e}")))
    }
}

fn missing(kind: &str, key: &str) -> RelayError {
    RelayError::InvalidArgument(format!("missing {kind} argument: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn blank_raw_input_is_empty_object() {
        let args = ToolArguments::from_raw("  ").unwrap();
        assert_eq!(args.raw(), &json!({}));
    }

    #[test]
    fn malformed_raw_input_is_invalid_argument() {
        let err = ToolArguments::from_raw("{\"location\":").unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
    }

    #[test]
    fn typed_getters_report_missing_keys() {
        let args = ToolArguments::new(json!({ "location": "Oslo", "days": 2 }));
        assert_eq!(args.get_str("location").unwrap(), "Oslo");
        assert_eq!(args.get_f64("days").unwrap(), 2.0);
        assert!(args.get_str("units").is_err());
        assert_eq!(args.get_str_opt("units"), None);
    }

    #[test]
    fn deserializes_into_struct() {
        #[derive(Deserialize)]
        struct Input {
            location: String,
        }
        let args = ToolArguments::new(json!({ "location": "Lima" }));
        let input: Input = args.deserialize().unwrap();
        assert_eq!(input.location, "Lima");
    }
}
