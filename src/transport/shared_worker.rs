//! `SharedWorker`-backed transport: one broker process serving every tab,
//! used when a page wants a single ordering authority instead of N-way
//! broadcast (spec §5). Speaks the `Broker`'s register/publish protocol —
//! messages sent before `registered` arrives are queued rather than lost,
//! and a connection error schedules an exponential-backoff reconnect up to
//! `reconnect_attempts` before giving up and calling `on_fallback`, mirroring
//! how the teacher's WebSocket client backed off before handing reconnect
//! policy to its caller.

use super::{MessageListener, Transport, TransportBase, TransportStats};
use crate::broker::BrokerFrame;
use crate::error::{PubsubError, Result};
use crate::message::Envelope;
use gloo_timers::callback::Timeout;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{MessageEvent, MessagePort, SharedWorker};

const INITIAL_BACKOFF_MS: u32 = 250;
const MAX_BACKOFF_MS: u32 = 10_000;

struct Connection {
    _worker: SharedWorker,
    port: MessagePort,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onerror: Closure<dyn FnMut(web_sys::Event)>,
}

struct Inner {
    script_url: String,
    channel_name: String,
    client_id: String,
    reconnect_attempts: u32,
    base: Rc<RefCell<TransportBase>>,
    conn: Option<Connection>,
    registered: bool,
    queue: Vec<Envelope>,
    attempt: u32,
    reconnect_timer: Option<Timeout>,
    on_fallback: Option<Rc<RefCell<dyn FnMut()>>>,
}

/// A `SharedWorker` transport. Registers with the broker on connect, queues
/// publishes until `registered` confirms the channel membership, and
/// reconnects with exponential backoff on worker/port errors.
pub struct SharedWorkerTransport {
    inner: Rc<RefCell<Inner>>,
}

impl SharedWorkerTransport {
    pub fn new(script_url: &str, channel_name: &str, client_id: &str, reconnect_attempts: u32) -> Result<Self> {
        let inner = Rc::new(RefCell::new(Inner {
            script_url: script_url.to_string(),
            channel_name: channel_name.to_string(),
            client_id: client_id.to_string(),
            reconnect_attempts,
            base: Rc::new(RefCell::new(TransportBase::new())),
            conn: None,
            registered: false,
            queue: Vec::new(),
            attempt: 0,
            reconnect_timer: None,
            on_fallback: None,
        }));
        connect(&inner)?;
        Ok(Self { inner })
    }

    /// Invoked once reconnect attempts are exhausted, so the cross-tab
    /// adapter can fall back to a different transport kind (spec §4.7).
    pub fn set_on_fallback(&self, cb: Rc<RefCell<dyn FnMut()>>) {
        self.inner.borrow_mut().on_fallback = Some(cb);
    }
}

fn connect(inner: &Rc<RefCell<Inner>>) -> Result<()> {
    let (script_url, client_id) = {
        let i = inner.borrow();
        (i.script_url.clone(), i.client_id.clone())
    };

    let worker = SharedWorker::new(&script_url)
        .map_err(|e| PubsubError::transport(format!("SharedWorker::new failed: {e:?}")))?;
    let port = worker.port();
    port.start();

    let weak_for_message = Rc::downgrade(inner);
    let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
        if let Some(inner) = weak_for_message.upgrade() {
            handle_message(&inner, event.data());
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    port.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

    let weak_for_error = Rc::downgrade(inner);
    let onerror = Closure::wrap(Box::new(move |_event: web_sys::Event| {
        if let Some(inner) = weak_for_error.upgrade() {
            handle_connection_error(&inner);
        }
    }) as Box<dyn FnMut(web_sys::Event)>);
    worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));

    {
        let mut i = inner.borrow_mut();
        i.conn = Some(Connection {
            _worker: worker,
            port,
            _onmessage: onmessage,
            _onerror: onerror,
        });
        i.registered = false;
    }

    let channel_name = inner.borrow().channel_name.clone();
    send_frame(
        inner,
        &BrokerFrame::Register {
            client_id: Some(client_id),
            channel_name: Some(channel_name),
        },
    );
    Ok(())
}

fn handle_message(inner: &Rc<RefCell<Inner>>, data: JsValue) {
    let frame: BrokerFrame = match serde_wasm_bindgen::from_value(data) {
        Ok(f) => f,
        Err(err) => {
            crate::warn_log!("dropping unparseable shared-worker frame: {}", err);
            return;
        }
    };

    match frame {
        BrokerFrame::Registered { .. } => {
            let queued = {
                let mut i = inner.borrow_mut();
                i.registered = true;
                i.attempt = 0;
                std::mem::take(&mut i.queue)
            };
            for envelope in queued {
                send_frame(inner, &BrokerFrame::Publish { envelope });
            }
        }
        BrokerFrame::Deliver { envelope } => {
            let base = inner.borrow().base.clone();
            base.borrow_mut().deliver(envelope);
        }
        BrokerFrame::Ping => send_frame(inner, &BrokerFrame::Pong),
        BrokerFrame::Register { .. } | BrokerFrame::Publish { .. } | BrokerFrame::Disconnect | BrokerFrame::Pong => {}
    }
}

fn handle_connection_error(inner: &Rc<RefCell<Inner>>) {
    {
        let mut i = inner.borrow_mut();
        i.base.borrow_mut().stats.send_errors += 1;
        i.conn = None;
        i.registered = false;
    }
    crate::error_log!("shared worker connection error, scheduling reconnect");
    schedule_reconnect(inner);
}

fn schedule_reconnect(inner: &Rc<RefCell<Inner>>) {
    let (attempt, max_attempts, closed) = {
        let i = inner.borrow();
        (i.attempt, i.reconnect_attempts, i.base.borrow().closed)
    };
    if closed {
        return;
    }

    if attempt >= max_attempts {
        crate::error_log!("shared worker exhausted {} reconnect attempts, falling back", max_attempts);
        let cb = inner.borrow().on_fallback.clone();
        if let Some(cb) = cb {
            (cb.borrow_mut())();
        }
        return;
    }

    let delay = backoff_delay_ms(attempt);
    let weak = Rc::downgrade(inner);
    let timer = Timeout::new(delay, move || {
        if let Some(inner) = weak.upgrade() {
            inner.borrow_mut().attempt += 1;
            if let Err(err) = connect(&inner) {
                crate::warn_log!("shared worker reconnect failed: {}", err);
                schedule_reconnect(&inner);
            }
        }
    });
    inner.borrow_mut().reconnect_timer = Some(timer);
}

fn backoff_delay_ms(attempt: u32) -> u32 {
    INITIAL_BACKOFF_MS.saturating_mul(1u32 << attempt.min(6)).min(MAX_BACKOFF_MS)
}

fn send_frame(inner: &Rc<RefCell<Inner>>, frame: &BrokerFrame) {
    let i = inner.borrow();
    let Some(conn) = &i.conn else { return };
    match serde_wasm_bindgen::to_value(frame) {
        Ok(value) => {
            let _ = conn.port.post_message(&value);
        }
        Err(err) => crate::warn_log!("shared worker frame serialize failed: {}", err),
    }
}

impl Transport for SharedWorkerTransport {
    fn name(&self) -> &'static str {
        "shared-worker"
    }

    fn is_available(&self) -> bool {
        is_supported()
    }

    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let mut i = self.inner.borrow_mut();
        if i.base.borrow().closed {
            return Err(PubsubError::lifecycle("transport closed"));
        }
        if !i.registered || i.conn.is_none() {
            i.queue.push(envelope.clone());
            return Ok(());
        }
        drop(i);
        send_frame(&self.inner, &BrokerFrame::Publish { envelope: envelope.clone() });
        self.inner.borrow().base.borrow_mut().stats.sent += 1;
        Ok(())
    }

    fn set_listener(&mut self, listener: MessageListener) {
        self.inner.borrow().base.borrow_mut().listener = Some(listener);
    }

    fn stats(&self) -> TransportStats {
        self.inner.borrow().base.borrow().stats.clone()
    }

    fn close(&mut self) {
        let mut i = self.inner.borrow_mut();
        if i.base.borrow().closed {
            return;
        }
        i.base.borrow_mut().closed = true;
        i.reconnect_timer.take();
        if let Some(conn) = i.conn.take() {
            conn.port.set_onmessage(None);
            conn.port.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.borrow().base.borrow().closed
    }
}

pub fn is_supported() -> bool {
    js_sys::Reflect::has(&js_sys::global(), &wasm_bindgen::JsValue::from_str("SharedWorker")).unwrap_or(false)
}
