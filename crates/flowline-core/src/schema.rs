//! JSON Schemas describing flow payloads.
//!
//! Schemas are derived from the Rust types with `schemars` when a flow is
//! defined and compiled once with `jsonschema`, so a bad schema surfaces as
//! a [`DefinitionError`] at startup rather than on the first request.

use jsonschema::{Draft, JSONSchema};
use schemars::JsonSchema;
use serde_json::{json, Value};

use crate::error::{DefinitionError, FlowError, FlowResult};

/// Derive the JSON Schema document of `T`
pub fn schema_of<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Bool(true));
    // Compiled as Draft 7 below; drop the generator's meta-schema pointer.
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
    }
    schema
}

/// Compiled validator for one payload shape
pub struct PayloadSchema {
    document: Value,
    compiled: JSONSchema,
}

impl std::fmt::Debug for PayloadSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadSchema")
            .field("document", &self.document)
            .finish()
    }
}

impl PayloadSchema {
    /// Compile an explicit schema document
    pub fn compile(flow: &str, document: Value) -> Result<Self, DefinitionError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&document)
            .map_err(|e| DefinitionError::InvalidSchema {
                flow: flow.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { document, compiled })
    }

    /// Check `instance` against the schema, collecting every violation
    pub fn validate(&self, instance: &Value) -> FlowResult<()> {
        if let Err(errors) = self.compiled.validate(instance) {
            let violations: Vec<Value> = errors
                .map(|error| {
                    json!({
                        "path": error.instance_path.to_string(),
                        "message": error.to_string(),
                    })
                })
                .collect();

            let summary = violations
                .iter()
                .filter_map(|v| v["message"].as_str())
                .collect::<Vec<_>>()
                .join("; ");

            return Err(FlowError::invalid_input(format!(
                "payload does not match schema: {}",
                summary
            ))
            .with_details(Value::Array(violations)));
        }
        Ok(())
    }
}
