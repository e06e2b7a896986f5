//! Teardown bookkeeping: disposal bins and once-only teardowns.
//!
//! Every component that subscribes to something pushes the matching
//! unsubscribe into a [`DisposalBin`]. Hosts empty their bin when they
//! disconnect, which is the only cancellation mechanism in the runtime.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

type Callback = Box<dyn FnOnce()>;

/// Handle for one callback in a [`DisposalBin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisposalId(u64);

/// Ordered list of teardown callbacks.
///
/// [`empty`](Self::empty) runs every callback exactly once, in insertion
/// order. A callback that panics is caught and logged so the remaining
/// callbacks still run.
#[derive(Default)]
pub struct DisposalBin {
    callbacks: RefCell<Vec<(DisposalId, Callback)>>,
    next_id: Cell<u64>,
}

impl DisposalBin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a teardown callback.
    pub fn add(&self, callback: impl FnOnce() + 'static) -> DisposalId {
        let id = DisposalId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.callbacks.borrow_mut().push((id, Box::new(callback)));
        id
    }

    /// Drop a callback without running it. Returns false if it already
    /// ran or was removed.
    pub fn remove(&self, id: DisposalId) -> bool {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(entry, _)| *entry != id);
        callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }

    /// Run and clear every callback.
    ///
    /// Callbacks added while the bin is being emptied run in the same
    /// call, so the bin is empty when this returns. Calling it on an
    /// empty bin is a no-op.
    pub fn empty(&self) {
        loop {
            // The borrow ends with this statement; callbacks may add to the bin.
            let batch = std::mem::take(&mut *self.callbacks.borrow_mut());
            if batch.is_empty() {
                break;
            }
            for (_, callback) in batch {
                run_isolated(callback);
            }
        }
    }
}

impl fmt::Debug for DisposalBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalBin")
            .field("pending", &self.len())
            .finish()
    }
}

/// A teardown shared between several owners that must run at most once.
///
/// Registration hands the same teardown to the descendant's disposal bin,
/// to its registration guard and to the manager's member entry; whichever
/// fires first wins and the others become no-ops.
pub struct Teardown {
    callback: RefCell<Option<Callback>>,
}

impl Teardown {
    pub fn new(callback: impl FnOnce() + 'static) -> Rc<Self> {
        Rc::new(Self {
            callback: RefCell::new(Some(Box::new(callback))),
        })
    }

    /// Run the teardown if it has not run yet.
    pub fn run(&self) {
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            run_isolated(callback);
        }
    }

    pub fn has_run(&self) -> bool {
        self.callback.borrow().is_none()
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("has_run", &self.has_run())
            .finish()
    }
}

fn run_isolated(callback: Callback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        tracing::error!(reason = panic_reason(payload.as_ref()), "teardown callback panicked");
    }
}

pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
