use jsonschema::JSONSchema;
use serde_json::{Map, Value};
use thiserror::Error;

use super::LoadError;
use crate::utils::strip_nulls;

#[derive(Debug, Error, PartialEq)]
pub enum ValveError {
    #[error("field required: {0}")]
    MissingField(String),
    #[error("{0}")]
    Invalid(String),
    #[error("invalid valves schema: {0}")]
    Schema(String),
}

/// A configuration schema declared by a tool module (`valves` or `user_valves`).
#[derive(Debug, Clone, PartialEq)]
pub struct ValvesSchema {
    schema: Value,
}

impl ValvesSchema {
    pub fn new(kind: &str, schema: Value) -> Result<Self, LoadError> {
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(LoadError::InvalidValves(format!(
                "{} must be an object schema",
                kind
            )));
        }
        if let Some(properties) = schema.get("properties") {
            if !properties.is_object() {
                return Err(LoadError::InvalidValves(format!(
                    "{}.properties must be an object",
                    kind
                )));
            }
        }
        JSONSchema::compile(&schema)
            .map_err(|e| LoadError::InvalidValves(format!("{}: {}", kind, e)))?;

        Ok(Self { schema })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Builds a validated configuration from a caller-supplied form.
    ///
    /// Null fields are dropped first, so `{"k": null}` behaves like an absent `k`.
    /// Undeclared keys are ignored and declared defaults fill the gaps.
    pub fn instantiate(&self, form: Map<String, Value>) -> Result<Map<String, Value>, ValveError> {
        let form = strip_nulls(form);
        let mut values = Map::new();

        if let Some(properties) = self.schema.get("properties").and_then(Value::as_object) {
            for (key, property) in properties {
                if let Some(value) = form.get(key) {
                    values.insert(key.clone(), value.clone());
                } else if let Some(default) = property.get("default") {
                    values.insert(key.clone(), default.clone());
                }
            }
        }

        if let Some(required) = self.schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !values.contains_key(key) {
                    return Err(ValveError::MissingField(key.to_string()));
                }
            }
        }

        let compiled =
            JSONSchema::compile(&self.schema).map_err(|e| ValveError::Schema(e.to_string()))?;
        let instance = Value::Object(values.clone());
        if let Err(errors) = compiled.validate(&instance) {
            let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join(", ");
            return Err(ValveError::Invalid(message));
        }

        Ok(values)
    }
}
