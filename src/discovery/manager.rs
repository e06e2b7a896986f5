//! Managed sets: the owner side of the registration handshake.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::{Claim, Signal, SignalKind};
use crate::disposal::Teardown;
use crate::host::{Host, SubscriptionId, WeakHost};

/// Side effects a manager applies as members come and go.
///
/// `added` runs right after the member joins the set, before any later
/// state change can reach it, so it is the place to sync current state
/// into the newcomer.
pub trait ManagerHooks<M> {
    fn added(&self, _member: &Rc<M>, _host: &Host) {}
    fn removed(&self, _member: &Rc<M>, _host: &Host) {}
}

/// Hooks that do nothing; for managers that only track membership.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<M> ManagerHooks<M> for NoHooks {}

struct Member<M> {
    key: u64,
    host: Host,
    value: Rc<M>,
    teardown: Rc<Teardown>,
}

struct ManagerInner<M> {
    kind: SignalKind,
    owner: WeakHost,
    hooks: Box<dyn ManagerHooks<M>>,
    members: RefCell<Vec<Member<M>>>,
    next_key: Cell<u64>,
    hook: Cell<Option<SubscriptionId>>,
}

/// Maintains the set of descendants of one kind bound to an owner host.
///
/// The manager listens while its host is connected. When the host
/// disconnects, every member is torn down (each teardown runs once) and
/// the set is left empty. Dropping the manager does the same.
pub struct Manager<M: 'static> {
    inner: Rc<ManagerInner<M>>,
}

impl<M: 'static> Manager<M> {
    /// Attach a manager for `kind` to `host`.
    pub fn attach(host: &Host, kind: SignalKind, hooks: impl ManagerHooks<M> + 'static) -> Self {
        let inner = Rc::new(ManagerInner {
            kind,
            owner: host.downgrade(),
            hooks: Box::new(hooks),
            members: RefCell::new(Vec::new()),
            next_key: Cell::new(1),
            hook: Cell::new(None),
        });
        let weak = Rc::downgrade(&inner);
        let hook = host.on_connect(move |host| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let handler = Rc::downgrade(&inner);
            let listener = host.listen(inner.kind, move |owner, signal| {
                handler
                    .upgrade()
                    .map_or(Claim::Ignored, |inner| inner.accept(owner, signal))
            });
            let owner = host.downgrade();
            let weak = Rc::downgrade(&inner);
            host.on_disconnect(move || {
                if let Some(owner) = owner.upgrade() {
                    owner.unlisten(listener);
                }
                if let Some(inner) = weak.upgrade() {
                    inner.clear();
                }
            });
        });
        inner.hook.set(Some(hook));
        Self { inner }
    }

    pub fn kind(&self) -> SignalKind {
        self.inner.kind
    }

    pub fn owner(&self) -> Option<Host> {
        self.inner.owner.upgrade()
    }

    pub fn len(&self) -> usize {
        self.inner.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.borrow().is_empty()
    }

    /// Current members in registration order.
    pub fn members(&self) -> Vec<Rc<M>> {
        self.inner
            .members
            .borrow()
            .iter()
            .map(|m| m.value.clone())
            .collect()
    }

    /// Current members with their hosts, in registration order.
    pub fn entries(&self) -> Vec<(Rc<M>, Host)> {
        self.inner
            .members
            .borrow()
            .iter()
            .map(|m| (m.value.clone(), m.host.clone()))
            .collect()
    }

    pub fn contains_host(&self, host: &Host) -> bool {
        self.inner.members.borrow().iter().any(|m| &m.host == host)
    }

    /// Tear down every member now.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl<M: 'static> ManagerInner<M> {
    fn accept(self: &Rc<Self>, owner: &Host, signal: &Signal) -> Claim {
        if signal.kind() != self.kind {
            return Claim::Ignored;
        }
        let Some(member) = signal.payload::<M>() else {
            if owner.config().dev_warnings {
                tracing::warn!(
                    owner = %owner.id(),
                    origin = %signal.origin().id(),
                    kind = ?self.kind,
                    "discovery payload has the wrong type for this manager, ignoring"
                );
            }
            return Claim::Ignored;
        };

        let existing = self
            .members
            .borrow()
            .iter()
            .find(|m| Rc::ptr_eq(&m.value, &member))
            .map(|m| m.teardown.clone());
        if let Some(teardown) = existing {
            signal.adopt(owner, &teardown);
            return Claim::Accepted;
        }

        let key = self.next_key.get();
        self.next_key.set(key + 1);
        let weak = Rc::downgrade(self);
        let teardown = signal.accept(owner, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(key);
            }
        });
        let host = signal.origin().clone();
        self.members.borrow_mut().push(Member {
            key,
            host: host.clone(),
            value: member.clone(),
            teardown,
        });
        tracing::debug!(owner = %owner.id(), member = %host.id(), kind = ?self.kind, "member added");
        self.hooks.added(&member, &host);
        Claim::Accepted
    }

    fn remove(&self, key: u64) {
        let removed = {
            let mut members = self.members.borrow_mut();
            members
                .iter()
                .position(|m| m.key == key)
                .map(|i| members.remove(i))
        };
        if let Some(member) = removed {
            tracing::debug!(member = %member.host.id(), kind = ?self.kind, "member removed");
            self.hooks.removed(&member.value, &member.host);
        }
    }

    fn clear(&self) {
        let teardowns: Vec<Rc<Teardown>> = self
            .members
            .borrow()
            .iter()
            .map(|m| m.teardown.clone())
            .collect();
        for teardown in teardowns {
            teardown.run();
        }
    }
}

impl<M: 'static> Drop for Manager<M> {
    fn drop(&mut self) {
        if let Some(hook) = self.inner.hook.take()
            && let Some(owner) = self.inner.owner.upgrade()
        {
            owner.remove_connect_hook(hook);
        }
        self.inner.clear();
    }
}

impl<M: 'static> fmt::Debug for Manager<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("kind", &self.inner.kind)
            .field("members", &self.len())
            .finish()
    }
}
