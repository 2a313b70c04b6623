//! Client side of the iframe bridge: listens on `window` for a `Syn` from
//! the embedding host, replies `Ack` on the transferred port, and waits for
//! `AckConfirm` before considering the connection live (spec §6).

use super::protocol::{ChannelFrame, HandshakeFrame, HandshakeState, PROTOCOL_VERSION};
use crate::bus::LocalBus;
use crate::client_id;
use crate::config::IframeClientConfig;
use crate::error::{PubsubError, Result};
use crate::message::{reserved_meta_keys, Message, PublishOptions};
use gloo_timers::callback::Timeout;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{MessageEvent, MessagePort};

/// Delay before a non-explicit disconnect triggers a fresh `connect()`
/// attempt when `autoReconnect` is enabled (spec §4.10).
const RECONNECT_DELAY_MS: u32 = 1_000;

/// Capabilities this client advertises in its `Ack` frame (spec §6).
const CLIENT_CAPABILITIES: &[&str] = &["publish", "subscribe"];

pub struct IframeClient {
    bus: Rc<RefCell<LocalBus>>,
    config: IframeClientConfig,
    client_id: String,
    state: RefCell<HandshakeState>,
    session_id: RefCell<Option<String>>,
    port: RefCell<Option<MessagePort>>,
    publish_hook_id: RefCell<Option<u64>>,
    _onwindowmessage: RefCell<Option<Closure<dyn FnMut(MessageEvent)>>>,
    _onportmessage: RefCell<Option<Closure<dyn FnMut(MessageEvent)>>>,
    disposed: RefCell<bool>,
    pending_connect: RefCell<Option<(js_sys::Function, js_sys::Function)>>,
    connect_timer: RefCell<Option<Timeout>>,
    reconnect_timer: RefCell<Option<Timeout>>,
    explicit_disconnect: RefCell<bool>,
}

impl IframeClient {
    /// Start listening for a `Syn` on `window`. Returns before the
    /// handshake completes; use `is_connected` to poll, or rely on
    /// publishes simply queuing until the port is live.
    pub fn new(bus: Rc<RefCell<LocalBus>>, config: IframeClientConfig) -> Result<Rc<Self>> {
        let client_id = client_id::get_or_create_client_id().unwrap_or_else(|_| client_id::generate_client_id());
        let client = Rc::new(Self {
            bus,
            config,
            client_id,
            state: RefCell::new(HandshakeState::Idle),
            session_id: RefCell::new(None),
            port: RefCell::new(None),
            publish_hook_id: RefCell::new(None),
            _onwindowmessage: RefCell::new(None),
            _onportmessage: RefCell::new(None),
            disposed: RefCell::new(false),
            pending_connect: RefCell::new(None),
            connect_timer: RefCell::new(None),
            reconnect_timer: RefCell::new(None),
            explicit_disconnect: RefCell::new(false),
        });

        client.wire_window_listener()?;
        let weak = Rc::downgrade(&client);
        let hook_id = client.bus.borrow_mut().on_publish(Rc::new(RefCell::new(
            move |message: &Message| {
                if let Some(client) = weak.upgrade() {
                    client.forward_to_host(message);
                }
            },
        )));
        *client.publish_hook_id.borrow_mut() = Some(hook_id);

        Ok(client)
    }

    /// Wait for the handshake this client is already passively listening
    /// for to complete. Resolves once `AckConfirm` arrives; rejects with
    /// `"Handshake timeout"` if `handshake_timeout_ms` elapses first (spec
    /// §4.10).
    pub fn connect(self: &Rc<Self>) -> js_sys::Promise {
        if self.is_connected() {
            return js_sys::Promise::resolve(&JsValue::TRUE);
        }

        let client = self.clone();
        js_sys::Promise::new(&mut move |resolve, reject| {
            *client.pending_connect.borrow_mut() = Some((resolve.clone(), reject.clone()));

            let weak = Rc::downgrade(&client);
            let timeout = Timeout::new(client.config.handshake_timeout_ms, move || {
                if let Some(client) = weak.upgrade() {
                    client.handle_connect_timeout();
                }
            });
            *client.connect_timer.borrow_mut() = Some(timeout);
        })
    }

    fn handle_connect_timeout(self: &Rc<Self>) {
        if self.is_connected() {
            return;
        }
        self.reject_pending_connect("Handshake timeout");
    }

    fn resolve_pending_connect(&self) {
        self.connect_timer.borrow_mut().take();
        if let Some((resolve, _)) = self.pending_connect.borrow_mut().take() {
            let _ = resolve.call1(&JsValue::NULL, &JsValue::TRUE);
        }
    }

    fn reject_pending_connect(&self, reason: &str) {
        self.connect_timer.borrow_mut().take();
        if let Some((_, reject)) = self.pending_connect.borrow_mut().take() {
            let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(reason));
        }
    }

    /// Schedules a fresh `connect()` attempt after a short delay, unless
    /// the client was disposed or the most recent disconnect was explicit
    /// (spec §4.10: only unexpected disconnects trigger auto-reconnect).
    fn maybe_schedule_reconnect(self: &Rc<Self>) {
        if *self.disposed.borrow() || *self.explicit_disconnect.borrow() || !self.config.auto_reconnect {
            return;
        }
        let weak = Rc::downgrade(self);
        let timer = Timeout::new(RECONNECT_DELAY_MS, move || {
            if let Some(client) = weak.upgrade() {
                let _ = client.connect();
            }
        });
        *self.reconnect_timer.borrow_mut() = Some(timer);
    }

    fn wire_window_listener(self: &Rc<Self>) -> Result<()> {
        let window = web_sys::window().ok_or_else(|| PubsubError::transport("no window available"))?;
        let weak = Rc::downgrade(self);
        let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(client) = weak.upgrade() {
                client.handle_window_message(event);
            }
        }) as Box<dyn FnMut(MessageEvent)>);

        window
            .add_event_listener_with_callback("message", onmessage.as_ref().unchecked_ref())
            .map_err(|e| PubsubError::transport(format!("addEventListener failed: {e:?}")))?;

        *self._onwindowmessage.borrow_mut() = Some(onmessage);
        Ok(())
    }

    fn handle_window_message(self: &Rc<Self>, event: MessageEvent) {
        if !self.config.expected_host_origin.is_empty() && event.origin() != self.config.expected_host_origin {
            crate::warn_log!("ignoring handshake attempt from untrusted origin '{}'", event.origin());
            return;
        }

        let Ok(frame) = serde_wasm_bindgen::from_value::<HandshakeFrame>(event.data()) else {
            return;
        };

        if let HandshakeFrame::Syn { session_id, version } = frame {
            if version != PROTOCOL_VERSION {
                crate::warn_log!("rejecting handshake with unsupported version {}", version);
                return;
            }
            let ports = event.ports();
            let port_js = ports.get(0);
            let Some(port_value) = port_js.dyn_ref::<MessagePort>().cloned() else {
                crate::warn_log!("syn frame carried no message port");
                return;
            };

            *self.session_id.borrow_mut() = Some(session_id.clone());
            *self.state.borrow_mut() = HandshakeState::SynSent;
            self.wire_port(port_value.clone());

            let ack = HandshakeFrame::Ack {
                session_id,
                version: PROTOCOL_VERSION,
                client_id: self.client_id.clone(),
                capabilities: CLIENT_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
            };
            if let Ok(value) = serde_wasm_bindgen::to_value(&ack) {
                let _ = port_value.post_message(&value);
            }
        }
    }

    fn wire_port(self: &Rc<Self>, port: MessagePort) {
        port.start();
        let weak = Rc::downgrade(self);
        let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(client) = weak.upgrade() {
                client.handle_port_message(event.data());
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        port.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        *self._onportmessage.borrow_mut() = Some(onmessage);
        *self.port.borrow_mut() = Some(port);
    }

    fn handle_port_message(self: &Rc<Self>, data: JsValue) {
        if let Ok(HandshakeFrame::AckConfirm { session_id }) =
            serde_wasm_bindgen::from_value::<HandshakeFrame>(data.clone())
        {
            if self.session_id.borrow().as_deref() == Some(session_id.as_str()) {
                *self.state.borrow_mut() = HandshakeState::Connected;
                *self.explicit_disconnect.borrow_mut() = false;
                crate::debug_log!("iframe handshake '{}' connected", session_id);
                self.resolve_pending_connect();
            }
            return;
        }

        if let Ok(frame) = serde_wasm_bindgen::from_value::<ChannelFrame>(data) {
            match frame {
                ChannelFrame::Message {
                    message_id,
                    topic,
                    payload,
                    timestamp,
                    schema_version,
                } => {
                    let mut message = Message {
                        id: message_id,
                        topic,
                        ts: timestamp,
                        payload,
                        schema_version,
                        meta: None,
                    };
                    message.meta_set(reserved_meta_keys::SOURCE, serde_json::json!("host"));
                    self.bus.borrow_mut().dispatch_external(message);
                }
                ChannelFrame::Disconnect { reason } => {
                    crate::debug_log!("host disconnected: {}", reason);
                    *self.state.borrow_mut() = HandshakeState::Disconnected;
                    self.port.borrow_mut().take();
                    self.maybe_schedule_reconnect();
                }
                ChannelFrame::Ping => self.send_frame(&ChannelFrame::Pong),
                ChannelFrame::Pong => {}
            }
        }
    }

    fn send_frame(&self, frame: &ChannelFrame) {
        let port = self.port.borrow();
        let Some(port) = port.as_ref() else { return };
        if let Ok(value) = serde_wasm_bindgen::to_value(frame) {
            let _ = port.post_message(&value);
        }
    }

    fn forward_to_host(self: &Rc<Self>, message: &Message) {
        if *self.disposed.borrow() {
            return;
        }
        if *self.state.borrow() != HandshakeState::Connected {
            return; // not connected yet; message is simply not relayed
        }
        if message.meta_get(reserved_meta_keys::SOURCE).is_some() {
            return; // came from the host originally, don't echo it back
        }
        self.send_frame(&ChannelFrame::Message {
            message_id: message.id.clone(),
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            timestamp: message.ts,
            schema_version: message.schema_version.clone(),
        });
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == HandshakeState::Connected
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<Message> {
        self.bus
            .borrow_mut()
            .publish(topic, payload, PublishOptions::default())
    }

    pub fn dispose(&self) {
        if *self.disposed.borrow() {
            return;
        }
        *self.disposed.borrow_mut() = true;
        *self.explicit_disconnect.borrow_mut() = true;
        self.reconnect_timer.borrow_mut().take();
        self.reject_pending_connect("client disposed");
        self.send_frame(&ChannelFrame::Disconnect {
            reason: "client disposed".to_string(),
        });
        if let Some(port) = self.port.borrow_mut().take() {
            port.close();
        }
        if let Some(hook_id) = self.publish_hook_id.borrow_mut().take() {
            self.bus.borrow_mut().remove_publish_hook(hook_id);
        }
    }
}
