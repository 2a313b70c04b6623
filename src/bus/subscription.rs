//! Subscription lifecycle: compile-once matcher cache, insertion-ordered
//! handler lists, and a strict per-pattern fan-out ceiling.

use crate::error::{PubsubError, Result};
use crate::message::Message;
use crate::topic::Pattern;
use std::cell::RefCell;
use std::rc::Rc;

pub type Handler = Rc<RefCell<dyn FnMut(&Message) -> crate::error::Result<()>>>;

struct Subscription {
    pattern: Pattern,
    handlers: Vec<(u64, Handler)>,
}

pub struct SubscriptionRegistry {
    max_handlers_per_topic: usize,
    subscriptions: Vec<Subscription>,
    next_handler_id: u64,
}

pub struct SubscriptionSummary {
    pub pattern: String,
    pub handler_count: usize,
    pub has_wildcards: bool,
}

impl SubscriptionRegistry {
    pub fn new(max_handlers_per_topic: usize) -> Self {
        Self {
            max_handlers_per_topic: max_handlers_per_topic.max(1),
            subscriptions: Vec::new(),
            next_handler_id: 0,
        }
    }

    /// Subscribe `handler` to `pattern`. Compiles and caches the matcher on
    /// first use of a pattern string. Fails loudly if the ceiling would be
    /// exceeded — exactly `N` handlers allowed, the `(N+1)`-th rejected.
    /// Returns a handler id used to unsubscribe.
    pub fn subscribe(&mut self, pattern_str: &str, handler: Handler) -> Result<u64> {
        let handler_id = self.next_handler_id;
        self.next_handler_id += 1;

        if let Some(sub) = self
            .subscriptions
            .iter_mut()
            .find(|s| s.pattern.raw() == pattern_str)
        {
            if sub.handlers.len() >= self.max_handlers_per_topic {
                return Err(PubsubError::capacity(format!(
                    "pattern '{pattern_str}' already has the maximum of {} handlers",
                    self.max_handlers_per_topic
                )));
            }
            sub.handlers.push((handler_id, handler));
            return Ok(handler_id);
        }

        let pattern = Pattern::compile(pattern_str)?;
        self.subscriptions.push(Subscription {
            pattern,
            handlers: vec![(handler_id, handler)],
        });
        Ok(handler_id)
    }

    /// Remove a single handler by id. If it was the last handler of its
    /// pattern, evict the cached matcher entirely.
    pub fn unsubscribe(&mut self, pattern_str: &str, handler_id: u64) {
        if let Some(idx) = self
            .subscriptions
            .iter()
            .position(|s| s.pattern.raw() == pattern_str)
        {
            let sub = &mut self.subscriptions[idx];
            sub.handlers.retain(|(id, _)| *id != handler_id);
            if sub.handlers.is_empty() {
                self.subscriptions.remove(idx);
            }
        }
    }

    /// Every handler across every pattern that matches `topic`, in
    /// subscription order (across patterns) then insertion order (within a
    /// pattern).
    pub fn matching_handlers(&self, topic: &str) -> Vec<Handler> {
        let mut out = Vec::new();
        for sub in &self.subscriptions {
            if sub.pattern.matches(topic) {
                out.extend(sub.handlers.iter().map(|(_, h)| h.clone()));
            }
        }
        out
    }

    pub fn summaries(&self) -> Vec<SubscriptionSummary> {
        self.subscriptions
            .iter()
            .map(|s| SubscriptionSummary {
                pattern: s.pattern.raw().to_string(),
                handler_count: s.handlers.len(),
                has_wildcards: s.pattern.has_wildcards(),
            })
            .collect()
    }

    pub fn pattern_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn msg(topic: &str) -> Message {
        Message {
            id: "1".into(),
            topic: topic.into(),
            ts: 0,
            payload: json!({}),
            schema_version: None,
            meta: None,
        }
    }

    fn counting_handler(counter: Rc<Cell<u32>>) -> Handler {
        Rc::new(RefCell::new(move |_msg: &Message| {
            counter.set(counter.get() + 1);
            Ok(())
        }))
    }

    #[test]
    fn ceiling_allows_exactly_n_handlers() {
        let mut reg = SubscriptionRegistry::new(2);
        let counter = Rc::new(Cell::new(0));
        reg.subscribe("t", counting_handler(counter.clone())).unwrap();
        reg.subscribe("t", counting_handler(counter.clone())).unwrap();
        assert!(reg.subscribe("t", counting_handler(counter)).is_err());
    }

    #[test]
    fn last_unsubscribe_evicts_matcher() {
        let mut reg = SubscriptionRegistry::new(10);
        let counter = Rc::new(Cell::new(0));
        let id = reg.subscribe("t", counting_handler(counter)).unwrap();
        assert_eq!(reg.pattern_count(), 1);
        reg.unsubscribe("t", id);
        assert_eq!(reg.pattern_count(), 0);
    }

    #[test]
    fn handlers_run_in_insertion_order_within_a_pattern() {
        let mut reg = SubscriptionRegistry::new(10);
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order_clone = order.clone();
            reg.subscribe(
                "t",
                Rc::new(RefCell::new(move |_m: &Message| {
                    order_clone.borrow_mut().push(i);
                    Ok(())
                })),
            )
            .unwrap();
        }
        for h in reg.matching_handlers("t") {
            let _ = (h.borrow_mut())(&msg("t"));
        }
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }
}
