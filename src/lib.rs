//! `pubsub-mfe`: a topic-routed publish/subscribe bus for micro-frontend
//! architectures, with cross-tab sync, iframe bridging, and durable
//! history. The crate root wires every module together and exposes the
//! `#[wasm_bindgen]` surface JS call sites use.

#![allow(dead_code)]

pub mod adapters;
pub mod batcher;
pub mod broker;
pub mod bus;
pub mod client_id;
pub mod codec;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod macros;
pub mod message;
pub mod schema;
pub mod security;
pub mod time;
pub mod topic;
pub mod transport;

use adapters::cross_tab::CrossTabAdapter;
use adapters::history::{HistoryAdapter, InMemoryStore};
use adapters::iframe::client::IframeClient;
use adapters::iframe::host::IframeHost;
use bus::LocalBus;
use config::{BusConfig, CrossTabConfig, HistoryConfig, IframeClientConfig, IframeHostConfig};
use error::PubsubError;
use message::{HistoryOptions, PublishOptions};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

/// Runs once when the wasm module is instantiated: installs a panic hook
/// that forwards Rust panics to `console.error` instead of the opaque
/// `unreachable` trap the default abort handler produces.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// The JS-facing handle to a `LocalBus`. Thin wrapper: every method borrows
/// the shared `Rc<RefCell<LocalBus>>` for the duration of the call only.
#[wasm_bindgen]
pub struct PubsubBus {
    inner: Rc<RefCell<LocalBus>>,
}

#[wasm_bindgen]
impl PubsubBus {
    #[wasm_bindgen(constructor)]
    pub fn new() -> PubsubBus {
        Self::with_app_name("default")
    }

    /// Construct a bus scoped to `app`, used as the channel namespace by
    /// any cross-tab adapter attached later.
    #[wasm_bindgen(js_name = withAppName)]
    pub fn with_app_name(app: &str) -> PubsubBus {
        let config = BusConfig {
            app: app.to_string(),
            ..BusConfig::default()
        };
        PubsubBus {
            inner: Rc::new(RefCell::new(LocalBus::new(config))),
        }
    }

    pub fn publish(&self, topic: &str, payload: JsValue) -> Result<JsValue, JsValue> {
        let value: serde_json::Value = serde_wasm_bindgen::from_value(payload)
            .map_err(|e| PubsubError::invalid_input(format!("payload decode failed: {e}")))?;
        let message = self
            .inner
            .borrow_mut()
            .publish(topic, value, PublishOptions::default())?;
        serde_wasm_bindgen::to_value(&message)
            .map_err(|e| JsValue::from(PubsubError::invalid_input(format!("message encode failed: {e}"))))
    }

    /// Subscribe a JS callback to `pattern`. Returns a handle whose
    /// `unsubscribe()` removes it.
    pub fn subscribe(&self, pattern: &str, handler: js_sys::Function) -> Result<Subscription, JsValue> {
        let bus = self.inner.clone();
        let pattern_owned = pattern.to_string();
        let rust_handler: bus::subscription::Handler = Rc::new(RefCell::new(move |msg: &message::Message| {
            let this = JsValue::NULL;
            let arg = serde_wasm_bindgen::to_value(msg)
                .map_err(|e| PubsubError::invalid_input(format!("message encode failed: {e}")))?;
            handler
                .call1(&this, &arg)
                .map_err(|e| PubsubError::invalid_input(format!("handler threw: {e:?}")))?;
            Ok(())
        }));

        let unsub = self.inner.borrow_mut().subscribe(pattern, rust_handler)?;
        Ok(Subscription {
            bus,
            pattern: pattern_owned,
            unsub: RefCell::new(Some(Box::new(unsub))),
        })
    }

    #[wasm_bindgen(js_name = getHistory)]
    pub fn get_history(
        &self,
        pattern: &str,
        limit: Option<usize>,
        from_time: Option<u64>,
    ) -> Result<JsValue, JsValue> {
        let options = HistoryOptions { limit, from_time };
        let history = self.inner.borrow().get_history(pattern, options)?;
        serde_wasm_bindgen::to_value(&history)
            .map_err(|e| JsValue::from(PubsubError::invalid_input(format!("history encode failed: {e}"))))
    }

    #[wasm_bindgen(js_name = registerSchema)]
    pub fn register_schema(&self, name: &str, version: &str, schema: JsValue) -> Result<(), JsValue> {
        let value: serde_json::Value = serde_wasm_bindgen::from_value(schema)
            .map_err(|e| PubsubError::invalid_input(format!("schema decode failed: {e}")))?;
        self.inner.borrow_mut().register_schema(name, version, value)?;
        Ok(())
    }

    #[wasm_bindgen(js_name = getSubscriptions)]
    pub fn get_subscriptions(&self) -> Result<JsValue, JsValue> {
        let summaries: Vec<_> = self
            .inner
            .borrow()
            .get_subscriptions()
            .into_iter()
            .map(|s| {
                serde_json::json!({
                    "pattern": s.pattern,
                    "handlerCount": s.handler_count,
                    "hasWildcards": s.has_wildcards,
                })
            })
            .collect();
        serde_wasm_bindgen::to_value(&summaries)
            .map_err(|e| JsValue::from(PubsubError::invalid_input(format!("subscriptions encode failed: {e}"))))
    }

    #[wasm_bindgen(js_name = getStats)]
    pub fn get_stats(&self) -> Result<JsValue, JsValue> {
        let stats = self.inner.borrow().get_stats();
        let value = serde_json::json!({
            "published": stats.published,
            "dispatched": stats.dispatched,
            "handlerErrors": stats.handler_errors,
        });
        serde_wasm_bindgen::to_value(&value)
            .map_err(|e| JsValue::from(PubsubError::invalid_input(format!("stats encode failed: {e}"))))
    }

    pub fn dispose(&self) {
        self.inner.borrow_mut().dispose();
    }

    /// Attach cross-tab synchronization, using the default configuration
    /// with `channel_name` overridden to `channel`.
    #[wasm_bindgen(js_name = attachCrossTab)]
    pub fn attach_cross_tab(&self, channel: &str) -> Result<CrossTabHandle, JsValue> {
        let config = CrossTabConfig {
            channel_name: channel.to_string(),
            ..CrossTabConfig::default()
        };
        let adapter = CrossTabAdapter::attach(self.inner.clone(), config)?;
        Ok(CrossTabHandle { inner: adapter })
    }

    #[wasm_bindgen(js_name = attachHistory)]
    pub fn attach_history(&self, namespace: &str) -> HistoryHandle {
        let config = HistoryConfig {
            namespace: namespace.to_string(),
            ..HistoryConfig::default()
        };
        let adapter = HistoryAdapter::attach(self.inner.clone(), config, InMemoryStore::default());
        HistoryHandle { inner: adapter }
    }

    #[wasm_bindgen(js_name = createIframeHost)]
    pub fn create_iframe_host(&self) -> IframeHostHandle {
        IframeHostHandle {
            inner: IframeHost::new(self.inner.clone(), IframeHostConfig::default()),
        }
    }

    #[wasm_bindgen(js_name = createIframeClient)]
    pub fn create_iframe_client(&self, expected_host_origin: &str) -> Result<IframeClientHandle, JsValue> {
        let config = IframeClientConfig {
            expected_host_origin: expected_host_origin.to_string(),
            ..IframeClientConfig::default()
        };
        let client = IframeClient::new(self.inner.clone(), config)?;
        Ok(IframeClientHandle { inner: client })
    }
}

impl Default for PubsubBus {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
pub struct Subscription {
    bus: Rc<RefCell<LocalBus>>,
    pattern: String,
    unsub: RefCell<Option<Box<dyn FnOnce(&mut LocalBus)>>>,
}

#[wasm_bindgen]
impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(unsub) = self.unsub.borrow_mut().take() {
            unsub(&mut self.bus.borrow_mut());
        }
    }

    #[wasm_bindgen(getter)]
    pub fn pattern(&self) -> String {
        self.pattern.clone()
    }
}

#[wasm_bindgen]
pub struct CrossTabHandle {
    inner: Rc<CrossTabAdapter>,
}

#[wasm_bindgen]
impl CrossTabHandle {
    #[wasm_bindgen(js_name = clientId)]
    pub fn client_id(&self) -> String {
        self.inner.client_id().to_string()
    }

    #[wasm_bindgen(js_name = isLeader)]
    pub fn is_leader(&self) -> bool {
        self.inner.is_leader()
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

#[wasm_bindgen]
pub struct HistoryHandle {
    inner: Rc<HistoryAdapter<InMemoryStore>>,
}

#[wasm_bindgen]
impl HistoryHandle {
    #[wasm_bindgen(js_name = getHistory)]
    pub fn get_history(
        &self,
        pattern: &str,
        limit: Option<usize>,
        from_time: Option<u64>,
    ) -> Result<JsValue, JsValue> {
        let history = self
            .inner
            .get_history(pattern, HistoryOptions { limit, from_time })?;
        serde_wasm_bindgen::to_value(&history)
            .map_err(|e| JsValue::from(PubsubError::invalid_input(format!("history encode failed: {e}"))))
    }

    #[wasm_bindgen(js_name = forceGc)]
    pub fn force_gc(&self) -> Result<usize, JsValue> {
        Ok(self.inner.force_gc()?)
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

#[wasm_bindgen]
pub struct IframeHostHandle {
    inner: Rc<IframeHost>,
}

#[wasm_bindgen]
impl IframeHostHandle {
    #[wasm_bindgen(js_name = connectIframe)]
    pub fn connect_iframe(
        &self,
        iframe: web_sys::HtmlIFrameElement,
        expected_origin: &str,
    ) -> Result<String, JsValue> {
        Ok(self.inner.connect_iframe(&iframe, expected_origin)?)
    }

    #[wasm_bindgen(js_name = connectedCount)]
    pub fn connected_count(&self) -> usize {
        self.inner.connected_count()
    }

    #[wasm_bindgen(js_name = handshakesFailed)]
    pub fn handshakes_failed(&self) -> u64 {
        self.inner.handshakes_failed()
    }

    #[wasm_bindgen(js_name = validationErrors)]
    pub fn validation_errors(&self) -> u64 {
        self.inner.validation_errors()
    }

    /// `callback(sessionId, clientId)`, fired once a handshake reaches the
    /// connected state.
    #[wasm_bindgen(js_name = onHandshakeComplete)]
    pub fn on_handshake_complete(&self, callback: js_sys::Function) {
        self.inner.set_on_handshake_complete(Rc::new(RefCell::new(move |session_id: &str, client_id: &str| {
            let this = JsValue::NULL;
            let _ = callback.call2(&this, &JsValue::from_str(session_id), &JsValue::from_str(client_id));
        })));
    }

    /// `callback(sessionId)`, fired once a handshake's retries are
    /// exhausted without ever connecting.
    #[wasm_bindgen(js_name = onHandshakeFailed)]
    pub fn on_handshake_failed(&self, callback: js_sys::Function) {
        self.inner.set_on_handshake_failed(Rc::new(RefCell::new(move |session_id: &str| {
            let this = JsValue::NULL;
            let _ = callback.call1(&this, &JsValue::from_str(session_id));
        })));
    }

    /// `callback(sessionId, schemaKey)`, fired when an inbound iframe
    /// message fails its schema check under `enforceSchemaValidation`.
    #[wasm_bindgen(js_name = onValidationError)]
    pub fn on_validation_error(&self, callback: js_sys::Function) {
        self.inner.set_on_validation_error(Rc::new(RefCell::new(move |session_id: &str, schema_key: &str| {
            let this = JsValue::NULL;
            let _ = callback.call2(&this, &JsValue::from_str(session_id), &JsValue::from_str(schema_key));
        })));
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

#[wasm_bindgen]
pub struct IframeClientHandle {
    inner: Rc<IframeClient>,
}

#[wasm_bindgen]
impl IframeClientHandle {
    /// Resolves once the handshake with the host completes, rejects with
    /// `"Handshake timeout"` if it doesn't within the configured window.
    pub fn connect(&self) -> js_sys::Promise {
        self.inner.connect()
    }

    #[wasm_bindgen(js_name = isConnected)]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}
