//! Discovery and registration: descendants binding to ancestor managers.
//!
//! A descendant that wants to bind dispatches a [`Signal`] from its host.
//! The signal walks the parent chain; the first listener of the same
//! [`SignalKind`] that accepts it claims the descendant and stops the
//! walk. Accepting hands back a teardown that runs exactly once, when
//! the descendant disconnects, its [`Registration`] guard is closed, or
//! the manager tears down its whole managed set.
//!
//! Per-descendant state machine:
//!
//! ```text
//! Unregistered -> PendingConnect -> Registered -> Unregistered
//! ```

mod active;
mod manager;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

pub use active::{ActiveRegistry, active_registry};
pub use manager::{Manager, ManagerHooks, NoHooks};

use crate::context::ContextId;
use crate::disposal::{DisposalId, Teardown};
use crate::host::{Host, HostId, SubscriptionId, WeakHost};

/// Discriminant for discovery signals. Listeners only see signals of
/// their own kind, so unrelated manager/descendant pairs never cross-bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// A consumer looking for the provider of one context.
    Context(ContextId),
    /// A media engine looking for the player that forwards to it.
    MediaProvider,
    /// A controls panel looking for the player's controls manager.
    ManagedControls,
    /// A generic managed element looking for its owner.
    ManagedElement,
}

/// Listener verdict. `Accepted` stops propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Accepted,
    Ignored,
}

/// Where a descendant is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    PendingConnect,
    Registered,
}

/// Per-dispatch handshake record shared by the signal, the accepting
/// manager and the descendant's registration guard.
#[derive(Debug)]
struct Ticket {
    state: Cell<RegistrationState>,
    owner: Cell<Option<HostId>>,
    teardown: RefCell<Option<Rc<Teardown>>>,
}

impl Ticket {
    fn pending() -> Rc<Self> {
        Rc::new(Self {
            state: Cell::new(RegistrationState::PendingConnect),
            owner: Cell::new(None),
            teardown: RefCell::new(None),
        })
    }

    fn bind(&self, owner: HostId, teardown: Rc<Teardown>) {
        self.state.set(RegistrationState::Registered);
        self.owner.set(Some(owner));
        *self.teardown.borrow_mut() = Some(teardown);
    }

    fn release(&self) {
        self.state.set(RegistrationState::Unregistered);
        self.owner.set(None);
        self.teardown.borrow_mut().take();
    }

    fn unclaimed(&self) {
        if self.state.get() == RegistrationState::PendingConnect {
            self.state.set(RegistrationState::Unregistered);
        }
    }

    fn teardown(&self) -> Option<Rc<Teardown>> {
        self.teardown.borrow().clone()
    }
}

/// A one-shot discovery message from a descendant.
pub struct Signal {
    kind: SignalKind,
    origin: Host,
    payload: Rc<dyn Any>,
    ticket: Rc<Ticket>,
}

impl Signal {
    pub fn new(kind: SignalKind, origin: &Host, payload: Rc<dyn Any>) -> Self {
        Self {
            kind,
            origin: origin.clone(),
            payload,
            ticket: Ticket::pending(),
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// The host that dispatched the signal.
    pub fn origin(&self) -> &Host {
        &self.origin
    }

    /// The payload, if it is a `T`.
    pub fn payload<T: 'static>(&self) -> Option<Rc<T>> {
        self.payload.clone().downcast::<T>().ok()
    }

    /// Claim the descendant for `owner`.
    ///
    /// `teardown` runs exactly once: when the origin disconnects, when
    /// its registration guard closes, or when the caller runs the
    /// returned handle (manager teardown), whichever happens first.
    pub fn accept(&self, owner: &Host, teardown: impl FnOnce() + 'static) -> Rc<Teardown> {
        let ticket: Weak<Ticket> = Rc::downgrade(&self.ticket);
        let watch: Rc<Cell<Option<DisposalId>>> = Rc::default();
        let handle = {
            let watch = watch.clone();
            let origin = self.origin.downgrade();
            Teardown::new(move || {
                // Torn down early: the origin's disconnect no longer needs to.
                if let Some(id) = watch.take()
                    && let Some(origin) = origin.upgrade()
                {
                    origin.cancel_disconnect(id);
                }
                if let Some(ticket) = ticket.upgrade() {
                    ticket.release();
                }
                teardown();
            })
        };
        {
            let handle = handle.clone();
            watch.set(Some(self.origin.on_disconnect(move || handle.run())));
        }
        self.ticket.bind(owner.id(), handle.clone());
        handle
    }

    /// Bind this signal to an existing membership instead of creating a
    /// new one (re-adding a member is a no-op).
    pub fn adopt(&self, owner: &Host, teardown: &Rc<Teardown>) {
        self.ticket.bind(owner.id(), teardown.clone());
    }

    /// Register `callback` to run when the origin disconnects.
    pub fn on_disconnect(&self, callback: impl FnOnce() + 'static) -> DisposalId {
        self.origin.on_disconnect(callback)
    }

    pub fn state(&self) -> RegistrationState {
        self.ticket.state.get()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("kind", &self.kind)
            .field("origin", &self.origin.id())
            .field("state", &self.state())
            .finish()
    }
}

struct RegistrationInner {
    kind: SignalKind,
    payload: Rc<dyn Any>,
    ticket: RefCell<Option<Rc<Ticket>>>,
    closed: Cell<bool>,
    host: WeakHost,
    hook: Cell<Option<SubscriptionId>>,
}

/// Guard for a descendant's binding to its manager.
///
/// While the guard is alive, every connect of the host dispatches a fresh
/// discovery signal. Closing or dropping the guard runs the current
/// membership's teardown and stops future dispatches.
pub struct Registration {
    inner: Rc<RegistrationInner>,
}

/// Register `payload` from `host` under `kind`.
///
/// Dispatches immediately if the host is already connected.
pub fn register(host: &Host, kind: SignalKind, payload: Rc<dyn Any>) -> Registration {
    let inner = Rc::new(RegistrationInner {
        kind,
        payload,
        ticket: RefCell::new(None),
        closed: Cell::new(false),
        host: host.downgrade(),
        hook: Cell::new(None),
    });
    let weak = Rc::downgrade(&inner);
    let hook = host.on_connect(move |host| {
        if let Some(inner) = weak.upgrade()
            && !inner.closed.get()
        {
            inner.dispatch(host);
        }
    });
    inner.hook.set(Some(hook));
    Registration { inner }
}

impl RegistrationInner {
    fn dispatch(&self, host: &Host) {
        let signal = Signal::new(self.kind, host, self.payload.clone());
        *self.ticket.borrow_mut() = Some(signal.ticket.clone());
        match host.dispatch(&signal) {
            Some(owner) => {
                tracing::trace!(origin = %host.id(), %owner, kind = ?self.kind, "registered");
            }
            None => {
                signal.ticket.unclaimed();
                tracing::debug!(origin = %host.id(), kind = ?self.kind, "no owner found");
            }
        }
    }
}

impl Registration {
    pub fn kind(&self) -> SignalKind {
        self.inner.kind
    }

    pub fn state(&self) -> RegistrationState {
        self.inner
            .ticket
            .borrow()
            .as_ref()
            .map_or(RegistrationState::Unregistered, |t| t.state.get())
    }

    /// Host that currently owns this registration.
    pub fn owner(&self) -> Option<HostId> {
        self.inner.ticket.borrow().as_ref().and_then(|t| t.owner.get())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Unregister now and stop re-registering on future connects.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        let ticket = self.inner.ticket.borrow().clone();
        if let Some(ticket) = ticket {
            if let Some(teardown) = ticket.teardown() {
                teardown.run();
            }
            ticket.release();
        }
        if let Some(hook) = self.inner.hook.take()
            && let Some(host) = self.inner.host.upgrade()
        {
            host.remove_connect_hook(hook);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .field("owner", &self.owner())
            .finish()
    }
}
