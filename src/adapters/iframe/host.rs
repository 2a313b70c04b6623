//! Host side of the iframe bridge: owns zero or more embedded iframes, runs
//! the SYN/ACK/ACK_CONFIRM handshake against each, and relays bus publishes
//! across each connected `MessagePort`. Disconnect is detected either by an
//! explicit `Disconnect` frame or by a `MutationObserver` noticing the
//! iframe element was removed from the DOM (spec §6, handshake + teardown).

use super::protocol::{ChannelFrame, HandshakeFrame, HandshakeState, PROTOCOL_VERSION};
use crate::bus::LocalBus;
use crate::config::IframeHostConfig;
use crate::error::{PubsubError, Result};
use crate::message::{reserved_meta_keys, Message};
use crate::security::origin::{OriginValidator, OriginValidatorConfig};
use crate::time::now_ms;
use gloo_timers::callback::Timeout;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    HtmlIFrameElement, MessageChannel, MessageEvent, MessagePort, MutationObserver,
    MutationObserverInit, Window,
};

/// Fires once a handshake reaches `Connected`, with the iframe's session id
/// and the clientId it generated.
pub type HandshakeCompleteHandler = Rc<RefCell<dyn FnMut(&str, &str)>>;
/// Fires once a handshake's retries are exhausted without ever connecting.
pub type HandshakeFailedHandler = Rc<RefCell<dyn FnMut(&str)>>;
/// Fires when an inbound iframe message fails its schema check under
/// `enforce_schema_validation`, with the session id and `name@version` key.
pub type ValidationErrorHandler = Rc<RefCell<dyn FnMut(&str, &str)>>;

struct Connection {
    state: HandshakeState,
    port: Option<MessagePort>,
    retries: u32,
    content_window: Window,
    expected_origin: String,
    client_id: Option<String>,
    _onmessage: Option<Closure<dyn FnMut(MessageEvent)>>,
    timeout: Option<Timeout>,
}

pub struct IframeHost {
    bus: Rc<RefCell<LocalBus>>,
    config: IframeHostConfig,
    origin_validator: OriginValidator,
    connections: RefCell<HashMap<String, Connection>>,
    publish_hook_id: RefCell<Option<u64>>,
    next_session_seq: RefCell<u64>,
    disposed: RefCell<bool>,
    handshakes_failed: RefCell<u64>,
    validation_errors: RefCell<u64>,
    on_handshake_complete: RefCell<Option<HandshakeCompleteHandler>>,
    on_handshake_failed: RefCell<Option<HandshakeFailedHandler>>,
    on_validation_error: RefCell<Option<ValidationErrorHandler>>,
}

impl IframeHost {
    pub fn new(bus: Rc<RefCell<LocalBus>>, config: IframeHostConfig) -> Rc<Self> {
        let origin_validator = OriginValidator::new(OriginValidatorConfig {
            allowed_origins: config.trusted_origins.clone(),
        });
        let host = Rc::new(Self {
            bus,
            config,
            origin_validator,
            connections: RefCell::new(HashMap::new()),
            publish_hook_id: RefCell::new(None),
            next_session_seq: RefCell::new(0),
            disposed: RefCell::new(false),
            handshakes_failed: RefCell::new(0),
            validation_errors: RefCell::new(0),
            on_handshake_complete: RefCell::new(None),
            on_handshake_failed: RefCell::new(None),
            on_validation_error: RefCell::new(None),
        });

        let weak = Rc::downgrade(&host);
        let hook_id = host.bus.borrow_mut().on_publish(Rc::new(RefCell::new(
            move |message: &Message| {
                if let Some(host) = weak.upgrade() {
                    host.broadcast_to_iframes(message);
                }
            },
        )));
        *host.publish_hook_id.borrow_mut() = Some(hook_id);

        host
    }

    fn next_session_id(&self) -> String {
        let mut seq = self.next_session_seq.borrow_mut();
        *seq += 1;
        format!("ifrm-{}-{}", now_ms(), *seq)
    }

    /// Begin the handshake against `iframe`, whose content window must
    /// already be same-origin-navigable to `expected_origin`. Sets up a
    /// `MutationObserver` on the iframe's parent so a later DOM removal is
    /// treated as a disconnect.
    pub fn connect_iframe(self: &Rc<Self>, iframe: &HtmlIFrameElement, expected_origin: &str) -> Result<String> {
        if !self.origin_validator.is_allowed(expected_origin) {
            return Err(PubsubError::security(format!(
                "origin '{expected_origin}' is not in the trusted set"
            )));
        }

        let content_window = iframe
            .content_window()
            .ok_or_else(|| PubsubError::transport("iframe has no content window"))?;

        let session_id = self.next_session_id();

        self.connections.borrow_mut().insert(
            session_id.clone(),
            Connection {
                state: HandshakeState::SynSent,
                port: None,
                retries: 0,
                content_window: content_window.clone(),
                expected_origin: expected_origin.to_string(),
                client_id: None,
                _onmessage: None,
                timeout: None,
            },
        );

        self.send_syn(&session_id, &content_window, expected_origin)?;
        self.observe_removal(iframe, session_id.clone());

        Ok(session_id)
    }

    /// Opens a fresh `MessageChannel`, posts `Syn` across it, and arms the
    /// handshake timeout. Used both for the initial handshake and for a
    /// retry after a timed-out attempt.
    fn send_syn(self: &Rc<Self>, session_id: &str, content_window: &Window, expected_origin: &str) -> Result<()> {
        let channel = MessageChannel::new()
            .map_err(|e| PubsubError::transport(format!("MessageChannel::new failed: {e:?}")))?;
        let host_port = channel.port1();
        let client_port = channel.port2();

        let syn = HandshakeFrame::Syn {
            session_id: session_id.to_string(),
            version: PROTOCOL_VERSION,
        };
        let syn_value = serde_wasm_bindgen::to_value(&syn)
            .map_err(|e| PubsubError::transport(format!("syn serialize failed: {e}")))?;
        let transfer = js_sys::Array::new();
        transfer.push(&client_port);

        content_window
            .post_message_with_transfer(&syn_value, expected_origin, &transfer)
            .map_err(|e| PubsubError::transport(format!("postMessage failed: {e:?}")))?;

        self.wire_host_port(session_id.to_string(), host_port);
        self.arm_handshake_timeout(session_id.to_string());
        Ok(())
    }

    fn wire_host_port(self: &Rc<Self>, session_id: String, port: MessagePort) {
        port.start();
        let weak = Rc::downgrade(self);
        let session_for_closure = session_id.clone();
        let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(host) = weak.upgrade() {
                host.handle_port_message(&session_for_closure, event.data());
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        port.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        if let Some(conn) = self.connections.borrow_mut().get_mut(&session_id) {
            conn.port = Some(port);
            conn._onmessage = Some(onmessage);
        }
    }

    fn arm_handshake_timeout(self: &Rc<Self>, session_id: String) {
        let weak = Rc::downgrade(self);
        let timeout_ms = self.config.handshake_timeout_ms;
        let timeout = Timeout::new(timeout_ms, move || {
            if let Some(host) = weak.upgrade() {
                host.handle_handshake_timeout(&session_id);
            }
        });
        if let Some(conn) = self.connections.borrow_mut().get_mut(&session_id) {
            conn.timeout = Some(timeout);
        }
    }

    fn handle_handshake_timeout(self: &Rc<Self>, session_id: &str) {
        let outcome = {
            let mut connections = self.connections.borrow_mut();
            let Some(conn) = connections.get_mut(session_id) else { return };
            if conn.state == HandshakeState::Connected {
                return;
            }
            if conn.retries < self.config.max_retries {
                conn.retries += 1;
                conn.state = HandshakeState::SynSent;
                Some((conn.content_window.clone(), conn.expected_origin.clone(), conn.retries))
            } else {
                conn.state = HandshakeState::Failed;
                None
            }
        };

        match outcome {
            Some((content_window, expected_origin, retries)) => {
                crate::warn_log!("iframe handshake '{}' timed out, retry {}", session_id, retries);
                if let Err(err) = self.send_syn(session_id, &content_window, &expected_origin) {
                    crate::error_log!("iframe handshake '{}' retry failed: {}", session_id, err);
                }
            }
            None => {
                crate::error_log!("iframe handshake '{}' failed after {} retries", session_id, self.config.max_retries);
                *self.handshakes_failed.borrow_mut() += 1;
                if let Some(cb) = self.on_handshake_failed.borrow().clone() {
                    (cb.borrow_mut())(session_id);
                }
            }
        }
    }

    fn handle_port_message(self: &Rc<Self>, session_id: &str, data: JsValue) {
        if let Ok(frame) = serde_wasm_bindgen::from_value::<HandshakeFrame>(data.clone()) {
            self.handle_handshake_frame(session_id, frame);
            return;
        }
        if let Ok(frame) = serde_wasm_bindgen::from_value::<ChannelFrame>(data) {
            self.handle_channel_frame(session_id, frame);
        }
    }

    fn handle_handshake_frame(self: &Rc<Self>, session_id: &str, frame: HandshakeFrame) {
        match frame {
            HandshakeFrame::Ack {
                session_id: ack_session,
                client_id,
                ..
            } if ack_session == session_id => {
                let confirm = HandshakeFrame::AckConfirm {
                    session_id: session_id.to_string(),
                };
                self.send_frame(session_id, &confirm);
                if let Some(conn) = self.connections.borrow_mut().get_mut(session_id) {
                    conn.state = HandshakeState::Connected;
                    conn.timeout.take();
                    conn.client_id = Some(client_id.clone());
                }
                if let Some(cb) = self.on_handshake_complete.borrow().clone() {
                    (cb.borrow_mut())(session_id, &client_id);
                }
            }
            _ => {}
        }
    }

    fn handle_channel_frame(self: &Rc<Self>, session_id: &str, frame: ChannelFrame) {
        match frame {
            ChannelFrame::Message {
                message_id,
                topic,
                payload,
                timestamp,
                schema_version,
            } => {
                if self.config.enforce_schema_validation {
                    if let Some(version) = &schema_version {
                        let valid = self
                            .bus
                            .borrow()
                            .validate_schema(&topic, version, &payload)
                            .unwrap_or(false);
                        if !valid {
                            *self.validation_errors.borrow_mut() += 1;
                            let schema_key = format!("{topic}@{version}");
                            crate::warn_log!(
                                "iframe '{}' message failed schema '{}'",
                                session_id,
                                schema_key
                            );
                            if let Some(cb) = self.on_validation_error.borrow().clone() {
                                (cb.borrow_mut())(session_id, &schema_key);
                            }
                            return;
                        }
                    }
                }

                let client_id = self
                    .connections
                    .borrow()
                    .get(session_id)
                    .and_then(|c| c.client_id.clone())
                    .unwrap_or_else(|| session_id.to_string());

                let mut message = Message {
                    id: message_id,
                    topic,
                    ts: timestamp,
                    payload,
                    schema_version,
                    meta: None,
                };
                message.meta_set(
                    reserved_meta_keys::SOURCE,
                    serde_json::json!(format!("iframe:{client_id}")),
                );
                self.bus.borrow_mut().dispatch_external(message);
            }
            ChannelFrame::Disconnect { reason } => {
                crate::debug_log!("iframe '{}' disconnected: {}", session_id, reason);
                self.teardown(session_id);
            }
            ChannelFrame::Ping => self.send_frame(session_id, &ChannelFrame::Pong),
            ChannelFrame::Pong => {}
        }
    }

    fn send_frame<T: serde::Serialize>(&self, session_id: &str, frame: &T) {
        let connections = self.connections.borrow();
        let Some(conn) = connections.get(session_id) else { return };
        let Some(port) = &conn.port else { return };
        match serde_wasm_bindgen::to_value(frame) {
            Ok(value) => {
                if let Err(err) = port.post_message(&value) {
                    crate::warn_log!("failed to post frame to iframe '{}': {:?}", session_id, err);
                }
            }
            Err(err) => crate::warn_log!("failed to serialize frame: {}", err),
        }
    }

    fn broadcast_to_iframes(&self, message: &Message) {
        if *self.disposed.borrow() {
            return;
        }
        // Don't echo back a message that arrived from an iframe.
        if message.meta_get(reserved_meta_keys::SOURCE).is_some() {
            return;
        }
        let frame = ChannelFrame::Message {
            message_id: message.id.clone(),
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            timestamp: message.ts,
            schema_version: message.schema_version.clone(),
        };
        let connections = self.connections.borrow();
        for (session_id, conn) in connections.iter() {
            if conn.state != HandshakeState::Connected {
                continue;
            }
            if let Some(port) = &conn.port {
                if let Ok(value) = serde_wasm_bindgen::to_value(&frame) {
                    if let Err(err) = port.post_message(&value) {
                        crate::warn_log!("failed to post to iframe '{}': {:?}", session_id, err);
                    }
                }
            }
        }
    }

    fn observe_removal(self: &Rc<Self>, iframe: &HtmlIFrameElement, session_id: String) {
        let Some(parent) = iframe.parent_node() else { return };
        let weak = Rc::downgrade(self);
        let iframe_node: web_sys::Node = iframe.clone().unchecked_into();
        let callback = Closure::wrap(Box::new(move |records: js_sys::Array, _observer: MutationObserver| {
            records.for_each(&mut |record, _, _| {
                let Ok(record) = record.dyn_into::<web_sys::MutationRecord>() else { return };
                let removed = record.removed_nodes();
                for i in 0..removed.length() {
                    if let Some(node) = removed.item(i) {
                        if node.is_same_node(Some(&iframe_node)) {
                            if let Some(host) = weak.upgrade() {
                                host.teardown(&session_id);
                            }
                        }
                    }
                }
            });
        }) as Box<dyn FnMut(js_sys::Array, MutationObserver)>);

        if let Ok(observer) = MutationObserver::new(callback.as_ref().unchecked_ref()) {
            let mut init = MutationObserverInit::new();
            init.child_list(true);
            let _ = observer.observe_with_options(&parent, &init);
        }
        callback.forget();
    }

    fn teardown(&self, session_id: &str) {
        if let Some(mut conn) = self.connections.borrow_mut().remove(session_id) {
            conn.state = HandshakeState::Disconnected;
            if let Some(port) = conn.port.take() {
                port.close();
            }
        }
    }

    pub fn connection_state(&self, session_id: &str) -> Option<HandshakeState> {
        self.connections.borrow().get(session_id).map(|c| c.state)
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .borrow()
            .values()
            .filter(|c| c.state == HandshakeState::Connected)
            .count()
    }

    pub fn handshakes_failed(&self) -> u64 {
        *self.handshakes_failed.borrow()
    }

    pub fn validation_errors(&self) -> u64 {
        *self.validation_errors.borrow()
    }

    pub fn set_on_handshake_complete(&self, cb: HandshakeCompleteHandler) {
        *self.on_handshake_complete.borrow_mut() = Some(cb);
    }

    pub fn set_on_handshake_failed(&self, cb: HandshakeFailedHandler) {
        *self.on_handshake_failed.borrow_mut() = Some(cb);
    }

    pub fn set_on_validation_error(&self, cb: ValidationErrorHandler) {
        *self.on_validation_error.borrow_mut() = Some(cb);
    }

    pub fn dispose(&self) {
        if *self.disposed.borrow() {
            return;
        }
        *self.disposed.borrow_mut() = true;
        let session_ids: Vec<String> = self.connections.borrow().keys().cloned().collect();
        for session_id in session_ids {
            self.teardown(&session_id);
        }
        if let Some(hook_id) = self.publish_hook_id.borrow_mut().take() {
            self.bus.borrow_mut().remove_publish_hook(hook_id);
        }
    }
}
