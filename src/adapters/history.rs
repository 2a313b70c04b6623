//! Durable message history, surviving a page reload unlike `LocalBus`'s
//! in-memory retention buffer. Backed by `PersistentStore`, so the wasm
//! target uses IndexedDB while tests exercise an in-memory stand-in — the
//! same seam the teacher drew between its WebSocket transport and a fake
//! transport in `ws_prop_test.rs`.

use crate::bus::LocalBus;
use crate::config::HistoryConfig;
use crate::error::{PubsubError, Result};
use crate::message::{HistoryOptions, Message, PublishOptions};
use crate::time::now_ms;
use crate::topic::Pattern;
use std::cell::RefCell;
use std::rc::Rc;

/// A durable key/value range store. One call site keeps this trait from
/// leaking wasm-bindgen types into the rest of the adapter.
pub trait PersistentStore {
    /// Insert a record keyed by `(namespace, timestamp, message_id)`.
    fn put(&mut self, namespace: &str, ts: u64, message: &Message) -> Result<()>;

    /// Every record in `namespace` with `ts >= from_time`, oldest first.
    fn range(&self, namespace: &str, from_time: u64) -> Result<Vec<Message>>;

    /// Delete every record in `namespace` with `ts < before`. Returns the
    /// count removed.
    fn delete_before(&mut self, namespace: &str, before: u64) -> Result<usize>;

    /// Count of records currently stored in `namespace`.
    fn count(&self, namespace: &str) -> Result<usize>;

    /// Delete the oldest `n` records in `namespace`.
    fn delete_oldest(&mut self, namespace: &str, n: usize) -> Result<usize>;
}

/// In-memory `PersistentStore` used by tests and as a safety-net fallback
/// when IndexedDB is unavailable (private browsing in some engines denies
/// it outright).
#[derive(Default)]
pub struct InMemoryStore {
    records: std::collections::BTreeMap<(String, u64, String), Message>,
}

impl PersistentStore for InMemoryStore {
    fn put(&mut self, namespace: &str, ts: u64, message: &Message) -> Result<()> {
        self.records
            .insert((namespace.to_string(), ts, message.id.clone()), message.clone());
        Ok(())
    }

    fn range(&self, namespace: &str, from_time: u64) -> Result<Vec<Message>> {
        Ok(self
            .records
            .iter()
            .filter(|((ns, ts, _), _)| ns == namespace && *ts >= from_time)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn delete_before(&mut self, namespace: &str, before: u64) -> Result<usize> {
        let keys: Vec<_> = self
            .records
            .keys()
            .filter(|(ns, ts, _)| ns == namespace && *ts < before)
            .cloned()
            .collect();
        let count = keys.len();
        for key in keys {
            self.records.remove(&key);
        }
        Ok(count)
    }

    fn count(&self, namespace: &str) -> Result<usize> {
        Ok(self.records.keys().filter(|(ns, _, _)| ns == namespace).count())
    }

    fn delete_oldest(&mut self, namespace: &str, n: usize) -> Result<usize> {
        let keys: Vec<_> = self
            .records
            .keys()
            .filter(|(ns, _, _)| ns == namespace)
            .take(n)
            .cloned()
            .collect();
        let count = keys.len();
        for key in keys {
            self.records.remove(&key);
        }
        Ok(count)
    }
}

pub struct HistoryAdapter<S: PersistentStore> {
    bus: Rc<RefCell<LocalBus>>,
    config: HistoryConfig,
    store: RefCell<S>,
    publish_hook_id: RefCell<Option<u64>>,
    gc_running: RefCell<bool>,
    disposed: RefCell<bool>,
}

impl<S: PersistentStore> HistoryAdapter<S> {
    pub fn attach(bus: Rc<RefCell<LocalBus>>, config: HistoryConfig, store: S) -> Rc<Self> {
        let adapter = Rc::new(Self {
            bus,
            config,
            store: RefCell::new(store),
            publish_hook_id: RefCell::new(None),
            gc_running: RefCell::new(false),
            disposed: RefCell::new(false),
        });

        let weak = Rc::downgrade(&adapter);
        let hook_id = adapter.bus.borrow_mut().on_publish(Rc::new(RefCell::new(
            move |message: &crate::message::Message| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.record(message);
                }
            },
        )));
        *adapter.publish_hook_id.borrow_mut() = Some(hook_id);

        adapter
    }

    fn record(&self, message: &Message) {
        if *self.disposed.borrow() {
            return;
        }
        if let Err(err) = self
            .store
            .borrow_mut()
            .put(&self.config.namespace, message.ts, message)
        {
            crate::warn_log!("history write failed: {}", err);
        }
    }

    pub fn get_history(&self, pattern: &str, options: HistoryOptions) -> Result<Vec<Message>> {
        let compiled = Pattern::compile(pattern)?;
        let from_time = options.from_time.unwrap_or(0);
        let mut messages = self.store.borrow().range(&self.config.namespace, from_time)?;
        messages.retain(|m| compiled.matches(&m.topic));
        messages.sort_by_key(|m| m.ts);
        if let Some(limit) = options.limit {
            messages.truncate(limit);
        }
        Ok(messages)
    }

    /// TTL-then-count eviction: first drop everything older than the
    /// configured TTL, then if still over capacity drop the oldest records
    /// until back under the limit (spec §6, History GC notes). Concurrent
    /// calls coalesce onto the in-flight run rather than doing duplicate
    /// work.
    pub fn force_gc(&self) -> Result<usize> {
        if *self.gc_running.borrow() {
            return Ok(0);
        }
        *self.gc_running.borrow_mut() = true;

        let result = (|| {
            let now = now_ms();
            let ttl_ms = self.config.ttl_seconds.saturating_mul(1000);
            let mut removed = 0;
            removed += self
                .store
                .borrow_mut()
                .delete_before(&self.config.namespace, now.saturating_sub(ttl_ms))?;

            let remaining = self.store.borrow().count(&self.config.namespace)?;
            if remaining > self.config.max_messages {
                let overflow = remaining - self.config.max_messages;
                removed += self
                    .store
                    .borrow_mut()
                    .delete_oldest(&self.config.namespace, overflow)?;
            }
            Ok(removed)
        })();

        *self.gc_running.borrow_mut() = false;
        result
    }

    pub fn dispose(&self) {
        if *self.disposed.borrow() {
            return;
        }
        *self.disposed.borrow_mut() = true;
        if let Some(hook_id) = self.publish_hook_id.borrow_mut().take() {
            self.bus.borrow_mut().remove_publish_hook(hook_id);
        }
    }
}

/// Replay every stored message matching `pattern` into `bus` as if it had
/// just been published — used by late-joining subscribers (spec §6).
pub fn replay_into_bus<S: PersistentStore>(
    adapter: &HistoryAdapter<S>,
    pattern: &str,
    options: HistoryOptions,
) -> Result<usize> {
    let messages = adapter.get_history(pattern, options)?;
    let count = messages.len();
    for message in messages {
        adapter
            .bus
            .borrow_mut()
            .dispatch_external(message);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use serde_json::json;

    fn bus() -> Rc<RefCell<LocalBus>> {
        Rc::new(RefCell::new(LocalBus::new(BusConfig::default())))
    }

    #[test]
    fn published_messages_are_recorded_and_queryable() {
        let bus = bus();
        let adapter = HistoryAdapter::attach(bus.clone(), HistoryConfig::default(), InMemoryStore::default());
        bus.borrow_mut()
            .publish("orders.created", json!({"id": 1}), PublishOptions::default())
            .unwrap();
        bus.borrow_mut()
            .publish("orders.created", json!({"id": 2}), PublishOptions::default())
            .unwrap();

        let history = adapter.get_history("orders.#", HistoryOptions::default()).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn force_gc_drops_entries_past_ttl() {
        let bus = bus();
        let config = HistoryConfig {
            ttl_seconds: 0,
            ..HistoryConfig::default()
        };
        let adapter = HistoryAdapter::attach(bus.clone(), config, InMemoryStore::default());
        bus.borrow_mut()
            .publish("t", json!(1), PublishOptions::default())
            .unwrap();
        let removed = adapter.force_gc().unwrap();
        assert_eq!(removed, 1);
        assert!(adapter.get_history("t", HistoryOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn force_gc_enforces_max_messages_after_ttl_pass() {
        let bus = bus();
        let config = HistoryConfig {
            ttl_seconds: 3600,
            max_messages: 2,
            ..HistoryConfig::default()
        };
        let adapter = HistoryAdapter::attach(bus.clone(), config, InMemoryStore::default());
        for i in 0..5 {
            bus.borrow_mut()
                .publish("t", json!(i), PublishOptions::default())
                .unwrap();
        }
        adapter.force_gc().unwrap();
        assert_eq!(adapter.store.borrow().count("default").unwrap(), 2);
    }

    #[test]
    fn dispose_stops_recording_further_publishes() {
        let bus = bus();
        let adapter = HistoryAdapter::attach(bus.clone(), HistoryConfig::default(), InMemoryStore::default());
        adapter.dispose();
        bus.borrow_mut()
            .publish("t", json!(1), PublishOptions::default())
            .unwrap();
        assert!(adapter.get_history("t", HistoryOptions::default()).unwrap().is_empty());
    }
}
