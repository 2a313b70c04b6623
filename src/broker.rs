//! The `SharedWorker` broker: the single ordering authority the
//! `SharedWorker` transport kind depends on (spec §5). This module runs
//! inside the worker's own global scope, not inside a regular tab.
//!
//! Speaks a small frame protocol over each connected port: a tab opens with
//! `register{clientId?, channelName?}`, the broker answers `registered` and
//! from then on relays `publish` frames as `deliver` to every other client
//! registered on the same channel — distinct channels never cross-talk.
//! `ping`/`pong` is a liveness check; `disconnect` tears the port down.

use crate::error::{PubsubError, Result};
use crate::message::Envelope;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, MessagePort};

const DEFAULT_CHANNEL: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerFrame {
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(rename = "channelName", skip_serializing_if = "Option::is_none")]
        channel_name: Option<String>,
    },
    #[serde(rename = "registered")]
    Registered {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "channelName")]
        channel_name: String,
    },
    #[serde(rename = "publish")]
    Publish { envelope: Envelope },
    #[serde(rename = "deliver")]
    Deliver { envelope: Envelope },
    #[serde(rename = "disconnect")]
    Disconnect,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
}

#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    pub connected_ports: usize,
    pub relayed: u64,
    pub dropped: u64,
}

struct PortEntry {
    port: MessagePort,
    client_id: Option<String>,
    channel_name: Option<String>,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
}

/// Owns every connected port, the `clientId -> port` map, and the
/// `channelName -> set<clientId>` membership used to partition relays.
pub struct Broker {
    ports: RefCell<HashMap<u64, PortEntry>>,
    client_to_port: RefCell<HashMap<String, u64>>,
    channels: RefCell<HashMap<String, HashSet<String>>>,
    next_port_id: RefCell<u64>,
    next_anon_client_seq: RefCell<u64>,
    stats: RefCell<BrokerStats>,
}

impl Broker {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            ports: RefCell::new(HashMap::new()),
            client_to_port: RefCell::new(HashMap::new()),
            channels: RefCell::new(HashMap::new()),
            next_port_id: RefCell::new(0),
            next_anon_client_seq: RefCell::new(0),
            stats: RefCell::new(BrokerStats::default()),
        })
    }

    /// Register a newly connected tab's port, typically called from the
    /// worker's `onconnect` handler with `event.ports()[0]`. The port isn't
    /// attributed to any client or channel until it sends `register`.
    pub fn register_port(self: &Rc<Self>, port: MessagePort) -> Result<u64> {
        port.start();
        let port_id = {
            let mut next = self.next_port_id.borrow_mut();
            let id = *next;
            *next += 1;
            id
        };

        let weak = Rc::downgrade(self);
        let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(broker) = weak.upgrade() {
                broker.handle_inbound(port_id, event.data());
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        port.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        self.ports.borrow_mut().insert(
            port_id,
            PortEntry {
                port,
                client_id: None,
                channel_name: None,
                _onmessage: onmessage,
            },
        );
        self.stats.borrow_mut().connected_ports = self.ports.borrow().len();
        Ok(port_id)
    }

    fn handle_inbound(self: &Rc<Self>, from_port_id: u64, data: wasm_bindgen::JsValue) {
        let frame: BrokerFrame = match serde_wasm_bindgen::from_value(data) {
            Ok(f) => f,
            Err(err) => {
                crate::warn_log!("broker dropped unparseable frame: {}", err);
                self.stats.borrow_mut().dropped += 1;
                return;
            }
        };

        match frame {
            BrokerFrame::Register { client_id, channel_name } => {
                self.handle_register(from_port_id, client_id, channel_name)
            }
            BrokerFrame::Publish { envelope } => self.handle_publish(from_port_id, envelope),
            BrokerFrame::Disconnect => self.disconnect_port(from_port_id),
            BrokerFrame::Ping => self.send_frame(from_port_id, &BrokerFrame::Pong),
            BrokerFrame::Registered { .. } | BrokerFrame::Deliver { .. } | BrokerFrame::Pong => {
                // Client-bound frames looped back to us; nothing to do.
            }
        }
    }

    fn generate_client_id(self: &Rc<Self>) -> String {
        let mut seq = self.next_anon_client_seq.borrow_mut();
        *seq += 1;
        format!("anon-{}", *seq)
    }

    fn handle_register(self: &Rc<Self>, port_id: u64, client_id: Option<String>, channel_name: Option<String>) {
        let client_id = client_id.unwrap_or_else(|| self.generate_client_id());
        let channel_name = channel_name.unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        {
            let mut ports = self.ports.borrow_mut();
            let Some(entry) = ports.get_mut(&port_id) else { return };
            entry.client_id = Some(client_id.clone());
            entry.channel_name = Some(channel_name.clone());
        }

        self.client_to_port.borrow_mut().insert(client_id.clone(), port_id);
        self.channels
            .borrow_mut()
            .entry(channel_name.clone())
            .or_default()
            .insert(client_id.clone());

        self.send_frame(
            port_id,
            &BrokerFrame::Registered {
                client_id,
                channel_name,
            },
        );
    }

    fn handle_publish(&self, from_port_id: u64, envelope: Envelope) {
        let channel_name = {
            let ports = self.ports.borrow();
            match ports.get(&from_port_id).and_then(|e| e.channel_name.clone()) {
                Some(name) => name,
                None => {
                    crate::warn_log!("broker dropped publish from unregistered port {}", from_port_id);
                    self.stats.borrow_mut().dropped += 1;
                    return;
                }
            }
        };

        let members = match self.channels.borrow().get(&channel_name) {
            Some(members) => members.clone(),
            None => return,
        };

        let client_to_port = self.client_to_port.borrow();
        let ports = self.ports.borrow();
        for member_client_id in members {
            let Some(&port_id) = client_to_port.get(&member_client_id) else { continue };
            if port_id == from_port_id {
                continue;
            }
            let Some(entry) = ports.get(&port_id) else { continue };
            match serde_wasm_bindgen::to_value(&BrokerFrame::Deliver {
                envelope: envelope.clone(),
            }) {
                Ok(value) => {
                    if entry.port.post_message(&value).is_ok() {
                        self.stats.borrow_mut().relayed += 1;
                    } else {
                        self.stats.borrow_mut().dropped += 1;
                    }
                }
                Err(err) => crate::warn_log!("broker failed to re-serialize envelope: {}", err),
            }
        }
    }

    fn send_frame(&self, port_id: u64, frame: &BrokerFrame) {
        let ports = self.ports.borrow();
        let Some(entry) = ports.get(&port_id) else { return };
        match serde_wasm_bindgen::to_value(frame) {
            Ok(value) => {
                let _ = entry.port.post_message(&value);
            }
            Err(err) => crate::warn_log!("broker failed to serialize frame: {}", err),
        }
    }

    pub fn disconnect_port(&self, port_id: u64) {
        let removed = self.ports.borrow_mut().remove(&port_id);
        if let Some(entry) = removed {
            entry.port.close();
            if let Some(client_id) = &entry.client_id {
                self.client_to_port.borrow_mut().remove(client_id);
                if let Some(channel_name) = &entry.channel_name {
                    if let Some(members) = self.channels.borrow_mut().get_mut(channel_name) {
                        members.remove(client_id);
                    }
                }
            }
        }
        self.stats.borrow_mut().connected_ports = self.ports.borrow().len();
    }

    pub fn stats(&self) -> BrokerStats {
        self.stats.borrow().clone()
    }
}

/// Wires `self.onconnect` in a `SharedWorkerGlobalScope` to register every
/// connecting tab's port with `broker`. Call once from the worker script's
/// entry point.
pub fn install_onconnect(broker: Rc<Broker>) -> Result<()> {
    let global = js_sys::global();
    let scope: web_sys::SharedWorkerGlobalScope = global
        .dyn_into()
        .map_err(|_| PubsubError::transport("not running inside a SharedWorker global scope"))?;

    let onconnect = Closure::wrap(Box::new(move |event: web_sys::Event| {
        let Ok(connect_event) = event.dyn_into::<web_sys::MessageEvent>() else { return };
        let ports = connect_event.ports();
        if let Some(port) = ports.get(0).dyn_ref::<MessagePort>().cloned() {
            if let Err(err) = broker.register_port(port) {
                crate::warn_log!("failed to register shared worker port: {}", err);
            }
        }
    }) as Box<dyn FnMut(web_sys::Event)>);

    scope.set_onconnect(Some(onconnect.as_ref().unchecked_ref()));
    onconnect.forget();
    Ok(())
}
