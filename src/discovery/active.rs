//! Single-active tracker passed down the tree through a context.
//!
//! Some things allow only one live instance per scope (one open menu,
//! one playing player). Instead of a process-wide singleton, the scope
//! root provides an [`ActiveRegistry`] through [`active_registry`] and
//! participants consume it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::context::Context;
use crate::disposal::DisposalId;
use crate::host::{Host, HostId, WeakHost};

struct ActiveOwner {
    host: HostId,
    on_deactivate: Box<dyn FnOnce()>,
    watch: (WeakHost, DisposalId),
}

impl ActiveOwner {
    fn finish(self) {
        let (host, watch) = self.watch;
        if let Some(host) = host.upgrade() {
            host.cancel_disconnect(watch);
        }
        (self.on_deactivate)();
    }
}

#[derive(Default)]
struct ActiveInner {
    owner: RefCell<Option<ActiveOwner>>,
}

/// Tracks which host is currently active in a scope.
#[derive(Clone, Default)]
pub struct ActiveRegistry {
    inner: Rc<ActiveInner>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently active host.
    pub fn owner(&self) -> Option<HostId> {
        self.inner.owner.borrow().as_ref().map(|o| o.host)
    }

    pub fn is_active(&self, host: &Host) -> bool {
        self.owner() == Some(host.id())
    }

    /// Make `host` the active instance.
    ///
    /// The previous owner's `on_deactivate` runs after the switch. If
    /// `host` is already active only its callback is replaced. The host
    /// is deactivated automatically when it disconnects.
    pub fn activate(&self, host: &Host, on_deactivate: impl FnOnce() + 'static) {
        if self.is_active(host) {
            if let Some(owner) = self.inner.owner.borrow_mut().as_mut() {
                owner.on_deactivate = Box::new(on_deactivate);
            }
            return;
        }
        let registry = Rc::downgrade(&self.inner);
        let id = host.id();
        let watch = host.on_disconnect(move || {
            if let Some(inner) = registry.upgrade() {
                ActiveRegistry { inner }.deactivate_id(id);
            }
        });
        let previous = self.inner.owner.replace(Some(ActiveOwner {
            host: id,
            on_deactivate: Box::new(on_deactivate),
            watch: (host.downgrade(), watch),
        }));
        tracing::debug!(active = %id, previous = ?previous.as_ref().map(|p| p.host), "active owner changed");

        if let Some(previous) = previous {
            previous.finish();
        }
    }

    /// Clear the active owner if it is `host`. Runs its callback.
    pub fn deactivate(&self, host: &Host) -> bool {
        self.deactivate_id(host.id())
    }

    fn deactivate_id(&self, id: HostId) -> bool {
        let previous = {
            let mut owner = self.inner.owner.borrow_mut();
            match owner.as_ref() {
                Some(current) if current.host == id => owner.take(),
                _ => None,
            }
        };
        match previous {
            Some(previous) => {
                previous.finish();
                true
            }
            None => false,
        }
    }
}

impl PartialEq for ActiveRegistry {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ActiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRegistry")
            .field("owner", &self.owner())
            .finish()
    }
}

thread_local! {
    static ACTIVE_REGISTRY: Context<ActiveRegistry> =
        Context::with_factory("active-registry", ActiveRegistry::new);
}

/// The shared context carrying the scope's [`ActiveRegistry`].
pub fn active_registry() -> Context<ActiveRegistry> {
    ACTIVE_REGISTRY.with(Context::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::cell::Cell;

    fn hosts() -> (Host, Host, Host) {
        let root = Host::root("app", RuntimeConfig::default());
        let a = Host::new("menu-a");
        let b = Host::new("menu-b");
        root.append_child(&a);
        root.append_child(&b);
        root.connect();
        (root, a, b)
    }

    #[test]
    fn activating_another_host_deactivates_previous() {
        let (_root, a, b) = hosts();
        let registry = ActiveRegistry::new();
        let closed = Rc::new(Cell::new(0));
        {
            let closed = closed.clone();
            registry.activate(&a, move || closed.set(closed.get() + 1));
        }
        assert!(registry.is_active(&a));
        registry.activate(&b, || {});
        assert_eq!(closed.get(), 1);
        assert_eq!(registry.owner(), Some(b.id()));
    }

    #[test]
    fn reactivating_same_host_does_not_fire_callback() {
        let (_root, a, _b) = hosts();
        let registry = ActiveRegistry::new();
        let closed = Rc::new(Cell::new(0));
        {
            let closed = closed.clone();
            registry.activate(&a, move || closed.set(closed.get() + 1));
        }
        registry.activate(&a, || {});
        assert_eq!(closed.get(), 0);
        assert!(registry.deactivate(&a));
        assert!(!registry.deactivate(&a));
        assert_eq!(registry.owner(), None);
    }

    #[test]
    fn deactivate_ignores_non_owner() {
        let (_root, a, b) = hosts();
        let registry = ActiveRegistry::new();
        registry.activate(&a, || {});
        assert!(!registry.deactivate(&b));
        assert!(registry.is_active(&a));
    }

    #[test]
    fn disconnecting_owner_clears_it() {
        let (root, a, _b) = hosts();
        let registry = ActiveRegistry::new();
        let closed = Rc::new(Cell::new(false));
        {
            let closed = closed.clone();
            registry.activate(&a, move || closed.set(true));
        }
        root.remove_child(&a);
        assert!(closed.get());
        assert_eq!(registry.owner(), None);
    }

    #[test]
    fn switching_owners_leaves_no_stale_disconnect_callbacks() {
        let (_root, a, b) = hosts();
        let registry = ActiveRegistry::new();
        let (a_before, b_before) = (a.pending_disconnect_count(), b.pending_disconnect_count());
        for _ in 0..50 {
            registry.activate(&a, || {});
            registry.activate(&b, || {});
        }
        registry.deactivate(&b);
        assert_eq!(a.pending_disconnect_count(), a_before);
        assert_eq!(b.pending_disconnect_count(), b_before);
    }

    #[test]
    fn registry_reaches_consumers_through_context() {
        let (root, a, _b) = hosts();
        let provider = active_registry().provide(&root);
        let consumer = active_registry().consume(&a);
        assert_eq!(consumer.get(), provider.get());
    }
}
