//! Bounded ordered log of published messages, for late-joiner replay.

use crate::message::{HistoryOptions, Message};
use crate::topic::Pattern;
use std::collections::VecDeque;

pub struct RetentionEntry {
    pub message: Message,
    pub published_at: u64,
}

pub struct RetentionBuffer {
    capacity: usize,
    entries: VecDeque<RetentionEntry>,
}

impl RetentionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn append(&mut self, message: Message, published_at: u64) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(RetentionEntry {
            message,
            published_at,
        });
    }

    /// Filter by `pattern`, bounded by `limit` and `from_time`, oldest-first.
    /// The filter is applied exactly once — callers must not re-filter the
    /// returned copy (spec §3, Retention entry invariant).
    pub fn query(&self, pattern: &Pattern, options: &HistoryOptions) -> Vec<Message> {
        let from_time = options.from_time.unwrap_or(0);
        let iter = self
            .entries
            .iter()
            .filter(|e| e.published_at >= from_time && pattern.matches(&e.message.topic))
            .map(|e| e.message.clone());

        match options.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(id: &str, topic: &str) -> Message {
        Message {
            id: id.into(),
            topic: topic.into(),
            ts: 0,
            payload: json!({}),
            schema_version: None,
            meta: None,
        }
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut buf = RetentionBuffer::new(2);
        buf.append(msg("1", "t"), 1);
        buf.append(msg("2", "t"), 2);
        buf.append(msg("3", "t"), 3);
        let pattern = Pattern::compile("t").unwrap();
        let history = buf.query(&pattern, &HistoryOptions::default());
        assert_eq!(history.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["2", "3"]);
    }

    #[test]
    fn query_filters_by_pattern_limit_and_from_time() {
        let mut buf = RetentionBuffer::new(100);
        for i in 0..5 {
            buf.append(msg(&format!("m{i}"), "orders.created"), i as u64 * 10);
        }
        buf.append(msg("other", "user.login"), 100);

        let pattern = Pattern::compile("orders.#").unwrap();
        let history = buf.query(
            &pattern,
            &HistoryOptions {
                limit: Some(3),
                from_time: Some(10),
            },
        );
        assert_eq!(
            history.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m2", "m3"]
        );
    }

    // Scenario S4: five orders.created messages, query with limit 10 and a
    // fromTime older than all of them returns them in publish order.
    #[test]
    fn s4_late_joiner_replay() {
        let mut buf = RetentionBuffer::new(100);
        for i in 1..=5 {
            buf.append(msg(&format!("m{i}"), "orders.created"), i as u64 * 1000);
        }
        let pattern = Pattern::compile("orders.#").unwrap();
        let history = buf.query(
            &pattern,
            &HistoryOptions {
                limit: Some(10),
                from_time: Some(0),
            },
        );
        assert_eq!(
            history.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m2", "m3", "m4", "m5"]
        );
    }
}
