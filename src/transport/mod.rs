//! Pluggable cross-tab wire transports (spec §5). Every transport speaks
//! the same `send`/`on_message` contract so the cross-tab adapter can swap
//! one for another without adapter-side changes — mirrors how the teacher's
//! `network` module abstracted its WebSocket transport behind a trait so the
//! reconnect logic above it never had to know which socket flavor was live.

pub mod broadcast;
pub mod shared_worker;
pub mod storage;

use crate::error::Result;
use crate::message::Envelope;
use std::cell::RefCell;
use std::rc::Rc;

pub type MessageListener = Rc<RefCell<dyn FnMut(Envelope)>>;

#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub sent: u64,
    pub received: u64,
    pub send_errors: u64,
}

/// Shared contract every concrete transport implements.
pub trait Transport {
    /// Stable, human-readable transport identifier (e.g. `"broadcast-channel"`).
    fn name(&self) -> &'static str;

    /// Whether the underlying browser API this transport depends on is
    /// currently usable. Checked at selection time by the cross-tab adapter
    /// and exposed here too so a caller holding a `dyn Transport` can ask
    /// the same question without knowing the concrete type.
    fn is_available(&self) -> bool;

    /// Send a wire envelope. Implementations serialize to JSON internally.
    fn send(&mut self, envelope: &Envelope) -> Result<()>;

    /// Register the single inbound listener. Transports deliver every
    /// message they receive (including their own echoes, where the medium
    /// doesn't filter them) — echo suppression is the adapter's job, not
    /// the transport's.
    fn set_listener(&mut self, listener: MessageListener);

    fn stats(&self) -> TransportStats;

    /// Idempotent. Safe to call more than once.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Shared bookkeeping every transport delegates to rather than
/// re-implementing close-idempotency and stats counting by hand.
pub(crate) struct TransportBase {
    pub listener: Option<MessageListener>,
    pub stats: TransportStats,
    pub closed: bool,
}

impl TransportBase {
    pub fn new() -> Self {
        Self {
            listener: None,
            stats: TransportStats::default(),
            closed: false,
        }
    }

    pub fn deliver(&mut self, envelope: Envelope) {
        if self.closed {
            return;
        }
        self.stats.received += 1;
        if let Some(listener) = self.listener.clone() {
            (listener.borrow_mut())(envelope);
        }
    }
}
