//! Schema registry and validator.
//!
//! Generalizes the teacher's single hard-coded `ENVELOPE_SCHEMA`
//! (`schema_validation.rs`, one `lazy_static! JSONSchema` compiled from an
//! embedded file) into a registry keyed by `name@version`, compiled once on
//! registration and immutable thereafter.

use crate::error::{PubsubError, Result};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Off,
    Warn,
    Strict,
}

impl Default for ValidationMode {
    fn default() -> Self {
        ValidationMode::Off
    }
}

struct SchemaEntry {
    raw: Value,
    compiled: JSONSchema,
}

fn schema_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

#[derive(Default)]
pub struct SchemaRegistry {
    entries: HashMap<String, SchemaEntry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under `name@version`. Idempotent when the schema
    /// is byte-identical to what's already registered; fails otherwise.
    pub fn register(&mut self, name: &str, version: &str, schema: Value) -> Result<()> {
        let key = schema_key(name, version);
        if let Some(existing) = self.entries.get(&key) {
            if existing.raw == schema {
                return Ok(());
            }
            return Err(PubsubError::invalid_input(format!(
                "schema '{key}' is already registered with a different shape"
            )));
        }

        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| PubsubError::invalid_input(format!("invalid schema '{key}': {e}")))?;

        self.entries.insert(
            key,
            SchemaEntry {
                raw: schema,
                compiled,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, name: &str, version: &str) -> bool {
        self.entries.contains_key(&schema_key(name, version))
    }

    /// Validate `payload` against `name@version` under `mode`. `Off` always
    /// passes without looking the schema up. `Warn` and `Strict` both
    /// report validity; the caller decides whether a `Warn` failure should
    /// merely be logged (bus) or escalate (it never does, by spec).
    pub fn validate(
        &self,
        name: &str,
        version: &str,
        payload: &Value,
        mode: ValidationMode,
    ) -> Result<bool> {
        if mode == ValidationMode::Off {
            return Ok(true);
        }

        let key = schema_key(name, version);
        let entry = self
            .entries
            .get(&key)
            .ok_or_else(|| PubsubError::invalid_input(format!("unknown schema '{key}'")))?;

        Ok(entry.compiled.validate(payload).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_schema() -> Value {
        json!({
            "type": "object",
            "properties": { "sku": { "type": "string" } },
            "required": ["sku"],
        })
    }

    #[test]
    fn register_then_validate() {
        let mut reg = SchemaRegistry::new();
        reg.register("cart_item", "1", object_schema()).unwrap();
        assert!(reg
            .validate("cart_item", "1", &json!({"sku": "A"}), ValidationMode::Strict)
            .unwrap());
        assert!(!reg
            .validate("cart_item", "1", &json!({}), ValidationMode::Strict)
            .unwrap());
    }

    #[test]
    fn off_mode_skips_lookup_entirely() {
        let reg = SchemaRegistry::new();
        assert!(reg
            .validate("missing", "1", &json!({}), ValidationMode::Off)
            .unwrap());
    }

    #[test]
    fn re_registering_identical_schema_is_idempotent() {
        let mut reg = SchemaRegistry::new();
        reg.register("a", "1", object_schema()).unwrap();
        reg.register("a", "1", object_schema()).unwrap();
    }

    #[test]
    fn re_registering_different_schema_fails() {
        let mut reg = SchemaRegistry::new();
        reg.register("a", "1", object_schema()).unwrap();
        let different = json!({"type": "string"});
        assert!(reg.register("a", "1", different).is_err());
    }
}
