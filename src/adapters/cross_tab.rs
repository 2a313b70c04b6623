//! Cross-tab synchronization: mirrors local publishes out to other tabs of
//! the same origin and injects what arrives back in, running every inbound
//! envelope through the security gates, dedupe cache, and echo filter
//! before it ever reaches `LocalBus::dispatch_external` (spec §4, §9).

use crate::batcher::Batcher;
use crate::bus::LocalBus;
use crate::client_id;
use crate::codec::{create_envelope, validate_and_sanitize_envelope, EnvelopeValidationConfig};
use crate::config::{CrossTabConfig, TransportKind};
use crate::dedupe::{DedupeCache, DedupeCacheConfig};
use crate::error::{PubsubError, Result};
use crate::message::{reserved_meta_keys, Envelope, Message, PublishOptions};
use crate::security::{SecurityConfig, SecurityGates};
use crate::time::now_ms;
use crate::transport::broadcast::BroadcastChannelTransport;
use crate::transport::shared_worker::SharedWorkerTransport;
use crate::transport::storage::StorageTransport;
use crate::transport::Transport;
use gloo_timers::callback::Timeout;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;

#[derive(Debug, Clone, Default)]
pub struct CrossTabStats {
    pub sent: u64,
    pub received: u64,
    pub duplicates_dropped: u64,
    pub echoes_dropped: u64,
    pub security_rejections: u64,
}

fn page_origin() -> String {
    web_sys::window()
        .and_then(|w| w.location().origin().ok())
        .unwrap_or_default()
}

fn new_shared_worker_transport(config: &CrossTabConfig, client_id: &str) -> Result<SharedWorkerTransport> {
    let script_url = config.shared_worker_script_url.as_deref().ok_or_else(|| {
        PubsubError::transport("SharedWorker transport requires shared_worker_script_url")
    })?;
    SharedWorkerTransport::new(
        script_url,
        &config.channel_name,
        client_id,
        config.shared_worker_reconnect_attempts,
    )
}

/// Picks a transport per `config.transport`. Under `Auto` the order is
/// shared-worker, then broadcast-channel, then storage (spec §4.7) — each
/// attempt that can't be made is logged as part of the fallback chain.
fn select_transport(config: &CrossTabConfig, client_id: &str) -> Result<Box<dyn Transport>> {
    match config.transport {
        TransportKind::BroadcastChannel => {
            Ok(Box::new(BroadcastChannelTransport::new(&config.channel_name)?))
        }
        TransportKind::Storage => Ok(Box::new(StorageTransport::new(&config.channel_name)?)),
        TransportKind::SharedWorker => Ok(Box::new(new_shared_worker_transport(config, client_id)?)),
        TransportKind::Auto => {
            let mut tried = Vec::new();

            if config.shared_worker_script_url.is_some() {
                if crate::transport::shared_worker::is_supported() {
                    match new_shared_worker_transport(config, client_id) {
                        Ok(transport) => {
                            crate::debug_log!(
                                "cross-tab transport selected: shared-worker (tried: {:?})",
                                tried
                            );
                            return Ok(Box::new(transport));
                        }
                        Err(err) => {
                            crate::warn_log!("shared-worker transport unavailable: {}", err);
                            tried.push("shared-worker");
                        }
                    }
                } else {
                    tried.push("shared-worker (unsupported)");
                }
            }

            if crate::transport::broadcast::is_supported() {
                crate::debug_log!(
                    "cross-tab transport selected: broadcast-channel (tried: {:?})",
                    tried
                );
                return Ok(Box::new(BroadcastChannelTransport::new(&config.channel_name)?));
            }
            tried.push("broadcast-channel (unsupported)");

            crate::warn_log!("cross-tab transport selected: storage (tried: {:?})", tried);
            Ok(Box::new(StorageTransport::new(&config.channel_name)?))
        }
    }
}

/// Attaches a cross-tab transport to a `LocalBus`. Holds the bus by shared
/// reference since both the outbound publish hook and the inbound transport
/// listener need independent access to it.
pub struct CrossTabAdapter {
    bus: Rc<RefCell<LocalBus>>,
    config: CrossTabConfig,
    client_id: String,
    origin: String,
    transport: Rc<RefCell<Box<dyn Transport>>>,
    security: RefCell<SecurityGates>,
    dedupe: RefCell<DedupeCache>,
    sequence: RefCell<u64>,
    publish_hook_id: RefCell<Option<u64>>,
    batcher: RefCell<Batcher<Box<dyn FnMut(Vec<Envelope>)>>>,
    timer: RefCell<Option<Timeout>>,
    stats: RefCell<CrossTabStats>,
    disposed: RefCell<bool>,
    is_leader: RefCell<bool>,
    system_event_timer: RefCell<Option<Timeout>>,
    visibility_listener: RefCell<Option<Closure<dyn FnMut(web_sys::Event)>>>,
}

fn document_is_visible() -> bool {
    web_sys::window()
        .and_then(|w| w.document())
        .map(|d| !d.hidden())
        .unwrap_or(true)
}

impl CrossTabAdapter {
    /// Create and wire the adapter. Registers the outbound publish hook and
    /// the inbound transport listener before returning.
    pub fn attach(bus: Rc<RefCell<LocalBus>>, config: CrossTabConfig) -> Result<Rc<Self>> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| client_id::get_or_create_client_id().unwrap_or_else(|_| client_id::generate_client_id()));
        let origin = page_origin();

        let transport = Rc::new(RefCell::new(select_transport(&config, &client_id)?));

        let security = SecurityGates::new(
            SecurityConfig::new(
                config.rate_limit.clone().unwrap_or_default(),
                config
                    .expected_origin
                    .clone()
                    .map(|o| vec![o])
                    .unwrap_or_default(),
                config.max_message_size,
            ),
            now_ms(),
        );

        let dedupe = DedupeCache::new(DedupeCacheConfig {
            max_entries: config.dedupe_cache_size,
            max_age_ms: config.dedupe_window_ms,
        });

        let transport_for_flush = transport.clone();
        let on_flush: Box<dyn FnMut(Vec<Envelope>)> = Box::new(move |batch: Vec<Envelope>| {
            let mut transport = transport_for_flush.borrow_mut();
            for envelope in batch {
                if let Err(err) = transport.send(&envelope) {
                    crate::warn_log!("cross-tab send failed: {}", err);
                }
            }
        });
        let batcher = Batcher::new(config.max_batch_size, on_flush);

        let adapter = Rc::new(Self {
            bus,
            config,
            client_id,
            origin,
            transport,
            security: RefCell::new(security),
            dedupe: RefCell::new(dedupe),
            sequence: RefCell::new(0),
            publish_hook_id: RefCell::new(None),
            batcher: RefCell::new(batcher),
            timer: RefCell::new(None),
            stats: RefCell::new(CrossTabStats::default()),
            disposed: RefCell::new(false),
            is_leader: RefCell::new(document_is_visible()),
            system_event_timer: RefCell::new(None),
            visibility_listener: RefCell::new(None),
        });

        adapter.wire_inbound_listener();
        let hook_id = adapter.wire_outbound_hook();
        *adapter.publish_hook_id.borrow_mut() = Some(hook_id);
        adapter.start_system_events();

        Ok(adapter)
    }

    /// Arms the `system.tab.initialized` emission and, if leadership
    /// tracking is enabled, wires a `visibilitychange` listener that emits
    /// `system.tab.leadership-changed` on transitions (spec §4.8).
    fn start_system_events(self: &Rc<Self>) {
        if self.config.emit_system_events {
            let weak = Rc::downgrade(self);
            let timeout = Timeout::new(0, move || {
                if let Some(adapter) = weak.upgrade() {
                    adapter.emit_tab_initialized();
                }
            });
            *self.system_event_timer.borrow_mut() = Some(timeout);
        }

        if self.config.enable_leadership {
            self.wire_visibility_listener();
        }
    }

    fn emit_tab_initialized(self: &Rc<Self>) {
        if *self.disposed.borrow() {
            return;
        }
        let is_leader = *self.is_leader.borrow();
        let message = Message {
            id: format!("sys-init-{}", self.client_id),
            topic: "system.tab.initialized".to_string(),
            ts: now_ms(),
            payload: serde_json::json!({
                "clientId": self.client_id,
                "timestamp": now_ms(),
                "isLeader": is_leader,
            }),
            schema_version: None,
            meta: None,
        };
        self.bus.borrow_mut().dispatch_external(message);
    }

    fn wire_visibility_listener(self: &Rc<Self>) {
        let Some(window) = web_sys::window() else { return };
        let Some(document) = window.document() else { return };
        let weak = Rc::downgrade(self);
        let closure = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            if let Some(adapter) = weak.upgrade() {
                adapter.handle_visibility_change();
            }
        }) as Box<dyn FnMut(web_sys::Event)>);

        if document
            .add_event_listener_with_callback("visibilitychange", closure.as_ref().unchecked_ref())
            .is_ok()
        {
            *self.visibility_listener.borrow_mut() = Some(closure);
        }
    }

    fn handle_visibility_change(self: &Rc<Self>) {
        if *self.disposed.borrow() {
            return;
        }
        let new_leader = document_is_visible();
        let changed = {
            let mut is_leader = self.is_leader.borrow_mut();
            let changed = *is_leader != new_leader;
            *is_leader = new_leader;
            changed
        };
        if changed && self.config.emit_system_events {
            let message = Message {
                id: format!("sys-leader-{}-{}", self.client_id, now_ms()),
                topic: "system.tab.leadership-changed".to_string(),
                ts: now_ms(),
                payload: serde_json::json!({
                    "clientId": self.client_id,
                    "timestamp": now_ms(),
                    "isLeader": new_leader,
                }),
                schema_version: None,
                meta: None,
            };
            self.bus.borrow_mut().dispatch_external(message);
        }
    }

    /// Whether this tab currently considers itself the leader (spec §4.8,
    /// a visibility-based signal: the most recently focused/visible tab).
    pub fn is_leader(&self) -> bool {
        *self.is_leader.borrow()
    }

    fn wire_outbound_hook(self: &Rc<Self>) -> u64 {
        let weak = Rc::downgrade(self);
        self.bus
            .borrow_mut()
            .on_publish(Rc::new(RefCell::new(move |message: &Message| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.handle_local_publish(message);
                }
            })))
    }

    fn wire_inbound_listener(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        self.transport
            .borrow_mut()
            .set_listener(Rc::new(RefCell::new(move |envelope: Envelope| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.handle_inbound(envelope);
                }
            })));
    }

    fn handle_local_publish(self: &Rc<Self>, message: &Message) {
        if *self.disposed.borrow() {
            return;
        }
        // Messages that arrived from another tab carry this marker; never
        // re-broadcast what we just received (spec §9, loop prevention).
        if message
            .meta_get(reserved_meta_keys::CROSS_TAB)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return;
        }

        let mut sequence = self.sequence.borrow_mut();
        *sequence += 1;
        let envelope = create_envelope(message, &self.client_id, &self.origin, Some(*sequence));
        drop(sequence);

        if let Err(err) = self.security.borrow_mut().check_outbound(&envelope, now_ms()) {
            crate::warn_log!("outbound message blocked: {}", err);
            self.stats.borrow_mut().security_rejections += 1;
            return;
        }

        let armed = self.batcher.borrow_mut().add(envelope);
        match armed {
            Ok(true) => self.arm_flush_timer(),
            Ok(false) => {}
            Err(err) => crate::warn_log!("batcher rejected envelope: {}", err),
        }
        self.stats.borrow_mut().sent += 1;
    }

    fn arm_flush_timer(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let interval = self.config.batch_interval_ms;
        let timeout = Timeout::new(interval, move || {
            if let Some(adapter) = weak.upgrade() {
                adapter.batcher.borrow_mut().flush();
            }
        });
        *self.timer.borrow_mut() = Some(timeout);
    }

    fn handle_inbound(self: &Rc<Self>, envelope: Envelope) {
        if *self.disposed.borrow() {
            return;
        }
        if envelope.client_id == self.client_id {
            self.stats.borrow_mut().echoes_dropped += 1;
            return; // our own broadcast, the medium doesn't filter it
        }

        let now = now_ms();
        if let Err(err) = self.security.borrow_mut().check_inbound(&envelope, now) {
            crate::warn_log!("inbound message rejected: {}", err);
            self.stats.borrow_mut().security_rejections += 1;
            return;
        }

        let fresh = self
            .dedupe
            .borrow_mut()
            .check_and_mark(&envelope.message_id, &envelope.client_id, now);
        if !fresh {
            self.stats.borrow_mut().duplicates_dropped += 1;
            return;
        }

        let source_client_id = envelope.client_id.clone();
        let origin = envelope.origin.clone();
        let sequence = envelope.sequence;

        let mut message = Message {
            id: envelope.message_id,
            topic: envelope.topic,
            ts: envelope.timestamp,
            payload: envelope.payload,
            schema_version: envelope.schema_version,
            meta: envelope.meta,
        };
        message.meta_set(reserved_meta_keys::CROSS_TAB, serde_json::json!(true));
        message.meta_set(
            reserved_meta_keys::SOURCE_CLIENT_ID,
            serde_json::json!(source_client_id),
        );
        message.meta_set(reserved_meta_keys::ORIGIN, serde_json::json!(origin));
        if let Some(seq) = sequence {
            message.meta_set(reserved_meta_keys::SEQUENCE, serde_json::json!(seq));
        }
        message.meta_set(
            reserved_meta_keys::SOURCE,
            serde_json::json!(format!("cross-tab:{source_client_id}")),
        );

        self.bus.borrow_mut().dispatch_external(message);
        self.stats.borrow_mut().received += 1;
    }

    /// Validate an arbitrary wire payload before trusting it as an
    /// envelope — used by callers that receive raw JSON off a transport
    /// this adapter doesn't own directly (e.g. a custom bridge).
    pub fn validate_raw(&self, value: serde_json::Value) -> Result<Envelope> {
        validate_and_sanitize_envelope(value, &EnvelopeValidationConfig::default())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn stats(&self) -> CrossTabStats {
        self.stats.borrow().clone()
    }

    pub fn dispose(self: &Rc<Self>) {
        if *self.disposed.borrow() {
            return;
        }
        *self.disposed.borrow_mut() = true;
        self.batcher.borrow_mut().dispose();
        self.transport.borrow_mut().close();
        self.timer.borrow_mut().take();
        self.system_event_timer.borrow_mut().take();
        if let Some(closure) = self.visibility_listener.borrow_mut().take() {
            if let Some(document) = web_sys::window().and_then(|w| w.document()) {
                let _ = document
                    .remove_event_listener_with_callback("visibilitychange", closure.as_ref().unchecked_ref());
            }
        }
        if let Some(hook_id) = self.publish_hook_id.borrow_mut().take() {
            self.bus.borrow_mut().remove_publish_hook(hook_id);
        }
    }

    pub fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<Message> {
        self.bus
            .borrow_mut()
            .publish(topic, payload, PublishOptions::default())
    }
}
