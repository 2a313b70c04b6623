//! Three independent inbound gates, applied in order: rate limiter, origin
//! validator, size validator (spec §4.5). Outbound only enforces the size
//! gate. A ring-buffer auditor records the most recent decisions.

pub mod auditor;
pub mod origin;
pub mod rate_limiter;
pub mod size;

use crate::error::{PubsubError, Result};
use crate::message::Envelope;
use auditor::{SecurityAuditor, SecurityEvent, SecurityEventKind};
use origin::{OriginValidator, OriginValidatorConfig};
use rate_limiter::{RateLimiter, RateLimiterConfig};
use size::{SizeValidator, SizeValidatorConfig};

#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub rate_limiter: RateLimiterConfig,
    pub allowed_origins: Vec<String>,
    pub max_bytes: usize,
    pub auditor_capacity: usize,
}

impl SecurityConfig {
    pub fn new(
        rate_limiter: RateLimiterConfig,
        allowed_origins: Vec<String>,
        max_bytes: usize,
    ) -> Self {
        Self {
            rate_limiter,
            allowed_origins,
            max_bytes,
            auditor_capacity: 200,
        }
    }
}

pub struct SecurityGates {
    rate_limiter: RateLimiter,
    origin_validator: OriginValidator,
    size_validator: SizeValidator,
    auditor: SecurityAuditor,
    pub rate_limited_count: u64,
    pub origin_blocked_count: u64,
    pub oversized_count: u64,
}

impl SecurityGates {
    pub fn new(config: SecurityConfig, now_ms: u64) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config.rate_limiter, now_ms),
            origin_validator: OriginValidator::new(OriginValidatorConfig {
                allowed_origins: config.allowed_origins,
            }),
            size_validator: SizeValidator::new(SizeValidatorConfig {
                max_bytes: config.max_bytes,
            }),
            auditor: SecurityAuditor::new(config.auditor_capacity.max(1)),
            rate_limited_count: 0,
            origin_blocked_count: 0,
            oversized_count: 0,
        }
    }

    /// Full inbound pipeline: rate limit, then origin, then size, in that
    /// order (spec §4.5).
    pub fn check_inbound(&mut self, envelope: &Envelope, now_ms: u64) -> Result<()> {
        if !self.rate_limiter.allow_message(now_ms) {
            self.rate_limited_count += 1;
            self.auditor.record(now_ms, SecurityEventKind::RateLimited);
            return Err(PubsubError::security("rate limit exceeded"));
        }

        if !self.origin_validator.is_allowed(&envelope.origin) {
            self.origin_blocked_count += 1;
            self.auditor.record(
                now_ms,
                SecurityEventKind::OriginBlocked {
                    origin: envelope.origin.clone(),
                },
            );
            return Err(PubsubError::security(format!(
                "origin '{}' is not allowed",
                envelope.origin
            )));
        }

        if !self.size_validator.is_valid(envelope) {
            self.oversized_count += 1;
            self.auditor.record(
                now_ms,
                SecurityEventKind::Oversized {
                    bytes: self.size_validator.encoded_len(envelope),
                    max_bytes: self.size_validator.max_bytes(),
                },
            );
            return Err(PubsubError::security("envelope exceeds size limit"));
        }

        self.auditor.record(now_ms, SecurityEventKind::Allowed);
        Ok(())
    }

    /// Outbound only enforces the size gate.
    pub fn check_outbound(&mut self, envelope: &Envelope, now_ms: u64) -> Result<()> {
        if !self.size_validator.is_valid(envelope) {
            self.oversized_count += 1;
            self.auditor.record(
                now_ms,
                SecurityEventKind::Oversized {
                    bytes: self.size_validator.encoded_len(envelope),
                    max_bytes: self.size_validator.max_bytes(),
                },
            );
            return Err(PubsubError::security("outbound envelope exceeds size limit"));
        }
        Ok(())
    }

    pub fn recent_events(&self) -> impl Iterator<Item = &SecurityEvent> {
        self.auditor.recent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WIRE_VERSION;

    fn envelope(origin: &str) -> Envelope {
        Envelope {
            message_id: "m1".into(),
            client_id: "c1".into(),
            topic: "t".into(),
            payload: serde_json::json!({}),
            timestamp: 0,
            version: WIRE_VERSION,
            origin: origin.into(),
            sequence: None,
            source: None,
            schema_version: None,
            meta: None,
        }
    }

    #[test]
    fn order_is_rate_then_origin_then_size() {
        let config = SecurityConfig::new(
            RateLimiterConfig {
                max_per_second: 0.0,
                max_burst: 0.0,
            },
            vec!["https://trusted.example".into()],
            10,
        );
        let mut gates = SecurityGates::new(config, 0);
        // Rate limiter is exhausted, so even a blocked-origin/oversized
        // envelope must fail with the rate-limit reason first.
        let err = gates.check_inbound(&envelope("https://evil.example"), 0).unwrap_err();
        assert!(err.to_string().contains("rate limit"));
        assert_eq!(gates.rate_limited_count, 1);
        assert_eq!(gates.origin_blocked_count, 0);
    }

    #[test]
    fn blocked_origin_is_reported_once_rate_allows() {
        let config = SecurityConfig::new(
            RateLimiterConfig {
                max_per_second: 100.0,
                max_burst: 100.0,
            },
            vec!["https://trusted.example".into()],
            100_000,
        );
        let mut gates = SecurityGates::new(config, 0);
        let err = gates.check_inbound(&envelope("https://evil.example"), 0).unwrap_err();
        assert!(err.to_string().contains("not allowed"));
        assert_eq!(gates.origin_blocked_count, 1);
    }

    #[test]
    fn outbound_only_checks_size() {
        let config = SecurityConfig::new(
            RateLimiterConfig {
                max_per_second: 0.0,
                max_burst: 0.0,
            },
            vec![],
            100_000,
        );
        let mut gates = SecurityGates::new(config, 0);
        assert!(gates.check_outbound(&envelope("https://anything"), 0).is_ok());
    }
}
