//! Coalesces outbound envelopes over a small interval.
//!
//! Flush triggers on either `batch_size == max_batch_size` or a timer first
//! armed when the buffer transitions empty → non-empty, cleared on every
//! flush. Manual flush on an empty buffer is a no-op. After `dispose`,
//! further adds are refused (lifecycle error), matching the teacher's
//! `WsClientV2::close()` idempotency convention.

use crate::error::{PubsubError, Result};
use crate::message::Envelope;

pub struct Batcher<F: FnMut(Vec<Envelope>)> {
    max_batch_size: usize,
    buffer: Vec<Envelope>,
    disposed: bool,
    timer_armed: bool,
    on_flush: F,
}

impl<F: FnMut(Vec<Envelope>)> Batcher<F> {
    pub fn new(max_batch_size: usize, on_flush: F) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            buffer: Vec::new(),
            disposed: false,
            timer_armed: false,
            on_flush,
        }
    }

    /// Add an envelope. Returns whether a timer should now be (re)armed by
    /// the caller — `true` exactly on the empty → non-empty transition, so
    /// callers (the cross-tab adapter) can start a `gloo_timers` timeout the
    /// first time the buffer stops being empty.
    pub fn add(&mut self, envelope: Envelope) -> Result<bool> {
        if self.disposed {
            return Err(PubsubError::lifecycle("batcher used after dispose"));
        }

        let was_empty = self.buffer.is_empty();
        self.buffer.push(envelope);

        if self.buffer.len() >= self.max_batch_size {
            self.flush();
            return Ok(false);
        }

        if was_empty {
            self.timer_armed = true;
            return Ok(true);
        }

        Ok(false)
    }

    /// Flush whatever is buffered. A no-op on an empty buffer (idempotent).
    pub fn flush(&mut self) {
        self.timer_armed = false;
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        (self.on_flush)(batch);
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.len()
    }

    /// Flush any remaining envelopes, then refuse further adds.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.flush();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WIRE_VERSION;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn envelope(id: &str) -> Envelope {
        Envelope {
            message_id: id.into(),
            client_id: "c1".into(),
            topic: "t".into(),
            payload: serde_json::json!({}),
            timestamp: 0,
            version: WIRE_VERSION,
            origin: "https://example.com".into(),
            sequence: None,
            source: None,
            schema_version: None,
            meta: None,
        }
    }

    #[test]
    fn flushes_at_max_batch_size() {
        let flushed: Rc<RefCell<Vec<Vec<Envelope>>>> = Rc::new(RefCell::new(Vec::new()));
        let flushed_clone = flushed.clone();
        let mut batcher = Batcher::new(2, move |batch| flushed_clone.borrow_mut().push(batch));

        assert!(batcher.add(envelope("a")).unwrap()); // arms timer
        assert!(!batcher.add(envelope("b")).unwrap()); // triggers flush
        assert_eq!(flushed.borrow().len(), 1);
        assert_eq!(flushed.borrow()[0].len(), 2);
        assert!(!batcher.timer_armed());
    }

    #[test]
    fn manual_flush_on_empty_buffer_is_noop() {
        let mut batcher = Batcher::new(10, |_| panic!("should not flush empty buffer"));
        batcher.flush();
    }

    #[test]
    fn dispose_flushes_then_refuses_further_adds() {
        let flushed: Rc<RefCell<Vec<Vec<Envelope>>>> = Rc::new(RefCell::new(Vec::new()));
        let flushed_clone = flushed.clone();
        let mut batcher = Batcher::new(10, move |batch| flushed_clone.borrow_mut().push(batch));
        batcher.add(envelope("a")).unwrap();
        batcher.dispose();
        assert_eq!(flushed.borrow().len(), 1);
        assert!(batcher.add(envelope("b")).is_err());
    }

    #[test]
    fn dispose_called_twice_behaves_like_once() {
        let mut batcher = Batcher::new(10, |_| {});
        batcher.add(envelope("a")).unwrap();
        batcher.dispose();
        batcher.dispose();
        assert!(batcher.is_disposed());
    }

    #[test]
    fn timer_arms_only_on_empty_to_nonempty_transition() {
        let mut batcher = Batcher::new(10, |_| {});
        assert!(batcher.add(envelope("a")).unwrap());
        assert!(!batcher.add(envelope("b")).unwrap());
    }
}
