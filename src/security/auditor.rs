//! Bounded ring buffer of the most recent security-gate decisions, for
//! introspection (e.g. an ops dashboard of the kind the teacher's own
//! `components/ops` panel renders from a bounded in-memory log).

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub enum SecurityEventKind {
    RateLimited,
    OriginBlocked { origin: String },
    Oversized { bytes: usize, max_bytes: usize },
    Allowed,
}

#[derive(Debug, Clone)]
pub struct SecurityEvent {
    pub ts: u64,
    pub kind: SecurityEventKind,
}

pub struct SecurityAuditor {
    capacity: usize,
    events: VecDeque<SecurityEvent>,
}

impl SecurityAuditor {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, ts: u64, kind: SecurityEventKind) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(SecurityEvent { ts, kind });
    }

    pub fn recent(&self) -> impl Iterator<Item = &SecurityEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut auditor = SecurityAuditor::new(2);
        auditor.record(1, SecurityEventKind::Allowed);
        auditor.record(2, SecurityEventKind::RateLimited);
        auditor.record(3, SecurityEventKind::Allowed);
        let ts: Vec<u64> = auditor.recent().map(|e| e.ts).collect();
        assert_eq!(ts, vec![2, 3]);
    }
}
