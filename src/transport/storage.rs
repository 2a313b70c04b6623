//! `localStorage`-backed transport — the universal fallback when neither
//! `BroadcastChannel` nor `SharedWorker` exists (old Safari, locked-down
//! embeds). Cross-tab delivery rides on the native `storage` event; since
//! `localStorage` has no TTL of its own, every write is a timestamp-prefixed
//! key this transport sweeps on an interval and again opportunistically
//! whenever `QuotaExceededError` is hit on write (spec §5, Storage
//! transport notes).

use super::{MessageListener, Transport, TransportBase, TransportStats};
use crate::error::{PubsubError, Result};
use crate::message::Envelope;
use crate::time::now_ms;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::{window, Storage, StorageEvent};

const KEY_PREFIX: &str = "pubsub-mfe:";
const ENTRY_TTL_MS: u64 = 5_000;

fn storage_key(channel_name: &str, ts: u64, seq: u64) -> String {
    format!("{KEY_PREFIX}{channel_name}:{ts}:{seq}")
}

fn is_own_key(key: &str, channel_name: &str) -> bool {
    key.starts_with(&format!("{KEY_PREFIX}{channel_name}:"))
}

pub struct StorageTransport {
    channel_name: String,
    storage: Storage,
    base: Rc<RefCell<TransportBase>>,
    next_seq: u64,
    _onstorage: Closure<dyn FnMut(StorageEvent)>,
}

impl StorageTransport {
    pub fn new(channel_name: &str) -> Result<Self> {
        let win = window().ok_or_else(|| PubsubError::transport("no window available"))?;
        let storage = win
            .local_storage()
            .map_err(|e| PubsubError::transport(format!("localStorage unavailable: {e:?}")))?
            .ok_or_else(|| PubsubError::transport("localStorage unavailable"))?;

        let base = Rc::new(RefCell::new(TransportBase::new()));
        let base_for_closure = base.clone();
        let channel_for_closure = channel_name.to_string();

        let onstorage = Closure::wrap(Box::new(move |event: StorageEvent| {
            let Some(key) = event.key() else { return };
            if !is_own_key(&key, &channel_for_closure) {
                return;
            }
            let Some(new_value) = event.new_value() else {
                return; // a deletion, not an inbound message
            };
            match serde_json::from_str::<Envelope>(&new_value) {
                Ok(envelope) => base_for_closure.borrow_mut().deliver(envelope),
                Err(err) => crate::warn_log!("dropping unparseable storage message: {}", err),
            }
        }) as Box<dyn FnMut(StorageEvent)>);

        win.add_event_listener_with_callback("storage", onstorage.as_ref().unchecked_ref())
            .map_err(|e| PubsubError::transport(format!("addEventListener failed: {e:?}")))?;

        Ok(Self {
            channel_name: channel_name.to_string(),
            storage,
            base,
            next_seq: 0,
            _onstorage: onstorage,
        })
    }

    /// Remove entries older than `ENTRY_TTL_MS`. Called on an interval by
    /// the cross-tab adapter and opportunistically on quota exhaustion.
    pub fn sweep_expired(&self) {
        let now = now_ms();
        let prefix = format!("{KEY_PREFIX}{}:", self.channel_name);
        let mut stale = Vec::new();

        let len = self.storage.length().unwrap_or(0);
        for i in 0..len {
            let Ok(Some(key)) = self.storage.key(i) else { continue };
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some(ts_str) = key.strip_prefix(&prefix).and_then(|rest| rest.split(':').next()) {
                if let Ok(ts) = ts_str.parse::<u64>() {
                    if now.saturating_sub(ts) > ENTRY_TTL_MS {
                        stale.push(key);
                    }
                }
            }
        }

        for key in stale {
            let _ = self.storage.remove_item(&key);
        }
    }
}

impl Transport for StorageTransport {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn is_available(&self) -> bool {
        is_supported()
    }

    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        if self.base.borrow().closed {
            return Err(PubsubError::lifecycle("transport closed"));
        }
        let json = serde_json::to_string(envelope)?;
        let key = storage_key(&self.channel_name, now_ms(), self.next_seq);
        self.next_seq += 1;

        match self.storage.set_item(&key, &json) {
            Ok(()) => {
                self.base.borrow_mut().stats.sent += 1;
                // Remove immediately after the event has had a chance to
                // fire elsewhere: localStorage is meant as a relay here,
                // not a store (history has its own dedicated adapter).
                let _ = self.storage.remove_item(&key);
                Ok(())
            }
            Err(e) => {
                self.base.borrow_mut().stats.send_errors += 1;
                self.sweep_expired();
                Err(PubsubError::transport(format!("localStorage write failed: {e:?}")))
            }
        }
    }

    fn set_listener(&mut self, listener: MessageListener) {
        self.base.borrow_mut().listener = Some(listener);
    }

    fn stats(&self) -> TransportStats {
        self.base.borrow().stats.clone()
    }

    fn close(&mut self) {
        let mut base = self.base.borrow_mut();
        if base.closed {
            return;
        }
        base.closed = true;
        if let Some(win) = window() {
            let _ = win.remove_event_listener_with_callback(
                "storage",
                self._onstorage.as_ref().unchecked_ref(),
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.base.borrow().closed
    }
}

/// `true` when `localStorage` is reachable — `false` in engines that deny
/// it outright (some private-browsing modes).
pub fn is_supported() -> bool {
    window()
        .and_then(|w| w.local_storage().ok().flatten())
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_roundtrips_its_own_prefix() {
        let key = storage_key("pubsub-mfe", 1234, 7);
        assert!(is_own_key(&key, "pubsub-mfe"));
        assert!(!is_own_key(&key, "other-channel"));
    }
}
