//! `BroadcastChannel`-backed transport — the default when the browser
//! supports it (spec §5: "BroadcastChannel is preferred for its simplicity
//! and native structured-clone support").

use super::{MessageListener, Transport, TransportBase, TransportStats};
use crate::error::{PubsubError, Result};
use crate::message::Envelope;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use web_sys::{BroadcastChannel, MessageEvent};

pub struct BroadcastChannelTransport {
    channel: BroadcastChannel,
    base: std::rc::Rc<std::cell::RefCell<TransportBase>>,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
}

impl BroadcastChannelTransport {
    pub fn new(channel_name: &str) -> Result<Self> {
        let channel = BroadcastChannel::new(channel_name)
            .map_err(|e| PubsubError::transport(format!("BroadcastChannel::new failed: {e:?}")))?;

        let base = std::rc::Rc::new(std::cell::RefCell::new(TransportBase::new()));
        let base_for_closure = base.clone();

        let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
            let data = event.data();
            match serde_wasm_bindgen::from_value::<Envelope>(data) {
                Ok(envelope) => base_for_closure.borrow_mut().deliver(envelope),
                Err(err) => crate::warn_log!("dropping unparseable broadcast message: {}", err),
            }
        }) as Box<dyn FnMut(MessageEvent)>);

        channel.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        Ok(Self {
            channel,
            base,
            _onmessage: onmessage,
        })
    }
}

impl Transport for BroadcastChannelTransport {
    fn name(&self) -> &'static str {
        "broadcast-channel"
    }

    fn is_available(&self) -> bool {
        is_supported()
    }

    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        if self.base.borrow().closed {
            return Err(PubsubError::lifecycle("transport closed"));
        }
        let value = serde_wasm_bindgen::to_value(envelope)
            .map_err(|e| PubsubError::transport(format!("envelope serialize failed: {e}")))?;
        let result = self.channel.post_message(&value);
        let mut base = self.base.borrow_mut();
        match result {
            Ok(()) => {
                base.stats.sent += 1;
                Ok(())
            }
            Err(e) => {
                base.stats.send_errors += 1;
                Err(PubsubError::transport(format!("postMessage failed: {e:?}")))
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
        self.channel.set_onmessage(None);
        self.channel.close();
    }

    fn is_closed(&self) -> bool {
        self.base.borrow().closed
    }
}

/// `true` when the global `BroadcastChannel` constructor exists on `self`.
pub fn is_supported() -> bool {
    js_sys::Reflect::has(
        &js_sys::global(),
        &JsValue::from_str("BroadcastChannel"),
    )
    .unwrap_or(false)
}
