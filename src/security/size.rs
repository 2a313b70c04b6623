//! Size validator: reject envelopes whose JSON-encoded UTF-8 byte length
//! exceeds a configured cap. Used both inbound (full security pipeline) and
//! outbound (size gate only, per spec §4.5).

use crate::message::Envelope;

#[derive(Debug, Clone)]
pub struct SizeValidatorConfig {
    pub max_bytes: usize,
}

impl Default for SizeValidatorConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024,
        }
    }
}

pub struct SizeValidator {
    config: SizeValidatorConfig,
}

impl SizeValidator {
    pub fn new(config: SizeValidatorConfig) -> Self {
        Self { config }
    }

    /// `isValid(e) ⇔ utf8_bytes(json(e)) ≤ maxBytes` (spec §8, invariant 6).
    pub fn is_valid(&self, envelope: &Envelope) -> bool {
        self.encoded_len(envelope) <= self.config.max_bytes
    }

    pub fn encoded_len(&self, envelope: &Envelope) -> usize {
        serde_json::to_string(envelope)
            .map(|s| s.len())
            .unwrap_or(usize::MAX)
    }

    pub fn max_bytes(&self) -> usize {
        self.config.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WIRE_VERSION;

    fn envelope_with_payload_len(n: usize) -> Envelope {
        Envelope {
            message_id: "m1".into(),
            client_id: "c1".into(),
            topic: "t".into(),
            payload: serde_json::Value::String("x".repeat(n)),
            timestamp: 0,
            version: WIRE_VERSION,
            origin: "https://example.com".into(),
            sequence: None,
            source: None,
            schema_version: None,
            meta: None,
        }
    }

    #[test]
    fn small_envelope_passes() {
        let v = SizeValidator::new(SizeValidatorConfig { max_bytes: 1000 });
        assert!(v.is_valid(&envelope_with_payload_len(10)));
    }

    #[test]
    fn oversized_envelope_fails() {
        let v = SizeValidator::new(SizeValidatorConfig { max_bytes: 50 });
        assert!(!v.is_valid(&envelope_with_payload_len(1000)));
    }

    #[test]
    fn boundary_is_inclusive() {
        let env = envelope_with_payload_len(0);
        let exact = serde_json::to_string(&env).unwrap().len();
        let v = SizeValidator::new(SizeValidatorConfig { max_bytes: exact });
        assert!(v.is_valid(&env));
    }
}
