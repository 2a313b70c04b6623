//! Versioned envelope construction and validation.
//!
//! Size validation, origin matching, and rate limiting are *not* done here —
//! those are adapter-layer security gates (`src/security/`). This module only
//! checks shape: required fields present, correctly typed, non-empty where
//! identity matters, and wire version recognized.

use crate::error::{PubsubError, Result};
use crate::message::{Envelope, Message, WIRE_VERSION};
use serde_json::Value;

/// Wrap a locally-produced message into an envelope tagged with the current
/// wire version, client id, and origin.
pub fn create_envelope(
    message: &Message,
    client_id: &str,
    origin: &str,
    sequence: Option<u64>,
) -> Envelope {
    Envelope {
        message_id: message.id.clone(),
        client_id: client_id.to_string(),
        topic: message.topic.clone(),
        payload: message.payload.clone(),
        timestamp: message.ts,
        version: WIRE_VERSION,
        origin: origin.to_string(),
        sequence,
        source: message
            .meta_get(crate::message::reserved_meta_keys::SOURCE)
            .and_then(|v| v.as_str())
            .map(str::to_string),
        schema_version: message.schema_version.clone(),
        meta: message.meta.clone(),
    }
}

/// Outcome of envelope validation: either valid, or invalid with a machine
/// code plus human-readable reason.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub code: Option<&'static str>,
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self {
            valid: true,
            code: None,
            error: None,
        }
    }

    fn fail(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            code: Some(code),
            error: Some(error.into()),
        }
    }
}

/// Structural validation config — currently just the accepted wire version,
/// kept as a struct so future versions can widen acceptance without
/// changing the call signature.
#[derive(Debug, Clone)]
pub struct EnvelopeValidationConfig {
    pub supported_version: u32,
}

impl Default for EnvelopeValidationConfig {
    fn default() -> Self {
        Self {
            supported_version: WIRE_VERSION,
        }
    }
}

/// Validate an arbitrary JSON value as a candidate envelope: required
/// fields present, correctly typed, non-empty identity strings, and
/// recognized wire version.
pub fn validate_envelope(value: &Value, config: &EnvelopeValidationConfig) -> ValidationOutcome {
    let obj = match value.as_object() {
        Some(o) => o,
        None => return ValidationOutcome::fail("not_an_object", "envelope must be a JSON object"),
    };

    for (field, required_nonempty) in [
        ("messageId", true),
        ("clientId", true),
        ("topic", true),
        ("origin", true),
    ] {
        match obj.get(field).and_then(Value::as_str) {
            Some(s) if !required_nonempty || !s.is_empty() => {}
            Some(_) => {
                return ValidationOutcome::fail(
                    "empty_field",
                    format!("field '{field}' must not be empty"),
                )
            }
            None => {
                return ValidationOutcome::fail(
                    "missing_field",
                    format!("field '{field}' is missing or not a string"),
                )
            }
        }
    }

    if !obj.contains_key("payload") {
        return ValidationOutcome::fail("missing_field", "field 'payload' is missing");
    }

    match obj.get("timestamp").and_then(Value::as_u64) {
        Some(_) => {}
        None => {
            return ValidationOutcome::fail(
                "missing_field",
                "field 'timestamp' is missing or not an integer",
            )
        }
    }

    let version = match obj.get("version").and_then(Value::as_u64) {
        Some(v) => v as u32,
        None => {
            return ValidationOutcome::fail(
                "missing_field",
                "field 'version' is missing or not an integer",
            )
        }
    };

    if version != config.supported_version {
        return ValidationOutcome::fail(
            "unsupported_version",
            format!("envelope version {version} is not supported"),
        );
    }

    ValidationOutcome::ok()
}

/// The adapter entry point: validate structurally and return the envelope
/// unchanged on success, or a typed error on failure.
pub fn validate_and_sanitize_envelope(
    value: Value,
    config: &EnvelopeValidationConfig,
) -> Result<Envelope> {
    let outcome = validate_envelope(&value, config);
    if !outcome.valid {
        return Err(PubsubError::invalid_input(
            outcome.error.unwrap_or_else(|| "invalid envelope".to_string()),
        ));
    }
    serde_json::from_value(value).map_err(PubsubError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_envelope_json() -> Value {
        json!({
            "messageId": "m1",
            "clientId": "c1",
            "topic": "cart.add",
            "payload": {"sku": "A"},
            "timestamp": 12345,
            "version": 1,
            "origin": "https://example.com",
        })
    }

    #[test]
    fn accepts_well_formed_envelope() {
        let cfg = EnvelopeValidationConfig::default();
        let outcome = validate_envelope(&valid_envelope_json(), &cfg);
        assert!(outcome.valid);
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut v = valid_envelope_json();
        v["version"] = json!(99);
        let cfg = EnvelopeValidationConfig::default();
        let outcome = validate_envelope(&v, &cfg);
        assert!(!outcome.valid);
        assert_eq!(outcome.code, Some("unsupported_version"));
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut v = valid_envelope_json();
        v.as_object_mut().unwrap().remove("clientId");
        let cfg = EnvelopeValidationConfig::default();
        let outcome = validate_envelope(&v, &cfg);
        assert!(!outcome.valid);
        assert_eq!(outcome.code, Some("missing_field"));
    }

    #[test]
    fn rejects_empty_identity_field() {
        let mut v = valid_envelope_json();
        v["topic"] = json!("");
        let cfg = EnvelopeValidationConfig::default();
        let outcome = validate_envelope(&v, &cfg);
        assert!(!outcome.valid);
        assert_eq!(outcome.code, Some("empty_field"));
    }

    #[test]
    fn sanitize_roundtrips_a_valid_envelope() {
        let cfg = EnvelopeValidationConfig::default();
        let env = validate_and_sanitize_envelope(valid_envelope_json(), &cfg).unwrap();
        assert_eq!(env.message_id, "m1");
        assert_eq!(env.topic, "cart.add");
    }
}
