//! Keyed request queue for commands issued before their target is ready.
//!
//! While buffering, each key holds at most one pending operation; a newer
//! request replaces the older one but keeps the key's original position,
//! so a flush runs operations in first-enqueue order. Once switched to
//! serve-immediately, requests run as they arrive.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::disposal::panic_reason;

type Operation<E> = Box<dyn FnOnce() -> Result<(), E>>;

struct Pending<E> {
    key: String,
    op: Operation<E>,
}

pub struct RequestQueue<E> {
    pending: RefCell<Vec<Pending<E>>>,
    serving: Cell<bool>,
}

impl<E: fmt::Display> RequestQueue<E> {
    /// An empty queue in buffering mode.
    pub fn new() -> Self {
        Self {
            pending: RefCell::new(Vec::new()),
            serving: Cell::new(false),
        }
    }

    /// Run `op` now when serving, otherwise store it under `key`.
    ///
    /// Buffered requests always return `Ok`; their failures surface in
    /// the logs at flush time.
    pub fn queue(&self, key: &str, op: impl FnOnce() -> Result<(), E> + 'static) -> Result<(), E> {
        if self.serving.get() {
            return op();
        }
        let mut pending = self.pending.borrow_mut();
        match pending.iter_mut().find(|p| p.key == key) {
            Some(existing) => {
                tracing::trace!(key, "replacing queued request");
                existing.op = Box::new(op);
            }
            None => {
                tracing::trace!(key, "request queued");
                pending.push(Pending {
                    key: key.to_string(),
                    op: Box::new(op),
                });
            }
        }
        Ok(())
    }

    /// Run and clear every pending operation. Returns how many ran.
    ///
    /// Failures and panics are logged and not retried; later operations
    /// still run. The mode is left unchanged.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let count = pending.len();
        for Pending { key, op } in pending {
            match panic::catch_unwind(AssertUnwindSafe(op)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "queued request failed"),
                Err(payload) => tracing::error!(
                    key = %key,
                    reason = panic_reason(payload.as_ref()),
                    "queued request panicked"
                ),
            }
        }
        if count > 0 {
            tracing::debug!(count, "request queue flushed");
        }
        count
    }

    /// Flush, then switch to serve-immediately. Requests buffered by the
    /// flushed operations themselves also run before this returns.
    pub fn serve(&self) -> usize {
        let mut ran = self.flush();
        self.serving.set(true);
        while !self.is_empty() {
            ran += self.flush();
        }
        ran
    }

    pub fn serve_immediately(&self, serving: bool) {
        self.serving.set(serving);
    }

    pub fn is_serving(&self) -> bool {
        self.serving.get()
    }

    /// Drop pending requests and go back to buffering.
    pub fn reset(&self) {
        let dropped = std::mem::take(&mut *self.pending.borrow_mut()).len();
        self.serving.set(false);
        if dropped > 0 {
            tracing::debug!(dropped, "request queue reset");
        }
    }

    /// Pending keys in run order.
    pub fn pending_keys(&self) -> Vec<String> {
        self.pending.borrow().iter().map(|p| p.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

impl<E: fmt::Display> Default for RequestQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for RequestQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.pending.borrow().iter().map(|p| p.key.clone()).collect();
        f.debug_struct("RequestQueue")
            .field("serving", &self.serving.get())
            .field("pending", &keys)
            .finish()
    }
}
