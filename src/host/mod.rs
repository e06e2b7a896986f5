//! Host tree: the explicit component tree the runtime binds against.
//!
//! A [`Host`] is one mounted component: it has a parent chain, a
//! connect/disconnect lifecycle, string attributes, event listeners and
//! a table of discovery listeners. Descendants find their managers by
//! walking the parent chain (see [`crate::discovery`]); nothing holds a
//! direct reference to the manager it binds to.
//!
//! Lifecycle rules:
//! - Connecting a host runs its connect hooks, then connects its children.
//! - Disconnecting a host disconnects its children (last first), then
//!   empties the host's [`DisposalBin`]. Everything a host subscribed to
//!   while connected is torn down before `disconnect` returns.

mod attributes;
mod events;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

pub use attributes::AttributeChange;
pub use events::Event;

use attributes::Attributes;
use events::EventTarget;

use crate::config::RuntimeConfig;
use crate::context::ContextId;
use crate::discovery::{Claim, Signal, SignalKind};
use crate::disposal::{DisposalBin, DisposalId};

/// Host-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("invalid attribute name: {0:?}")]
    InvalidAttributeName(String),
}

/// Process-unique host identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(u64);

impl HostId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

/// Handle for a listener or observer registered on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Per-host state keyed by what installed it. Used to make `provide`
/// and bridge attachment idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SlotKey {
    Context(ContextId),
    Named(&'static str),
}

type ConnectHook = Rc<dyn Fn(&Host)>;
type SignalHandler = Rc<dyn Fn(&Host, &Signal) -> Claim>;

struct Listener {
    id: SubscriptionId,
    kind: SignalKind,
    handler: SignalHandler,
}

struct HostInner {
    id: HostId,
    name: String,
    config: RefCell<Option<Rc<RuntimeConfig>>>,
    parent: RefCell<Weak<HostInner>>,
    children: RefCell<Vec<Host>>,
    connected: Cell<bool>,
    connect_hooks: RefCell<Vec<(SubscriptionId, ConnectHook)>>,
    bin: DisposalBin,
    listeners: RefCell<Vec<Listener>>,
    next_subscription: Cell<u64>,
    slots: RefCell<HashMap<SlotKey, Rc<dyn Any>>>,
    attributes: Attributes,
    events: EventTarget,
}

/// A node of the component tree. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Host {
    inner: Rc<HostInner>,
}

/// Non-owning host reference, for closures stored on other hosts.
#[derive(Clone, Default)]
pub struct WeakHost {
    inner: Weak<HostInner>,
}

impl WeakHost {
    pub fn upgrade(&self) -> Option<Host> {
        self.inner.upgrade().map(|inner| Host { inner })
    }
}

impl fmt::Debug for WeakHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(host) => write!(f, "WeakHost({})", host.id()),
            None => write!(f, "WeakHost(dropped)"),
        }
    }
}

impl Host {
    /// Create a detached, disconnected host.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(HostInner {
                id: HostId::next(),
                name: name.into(),
                config: RefCell::new(None),
                parent: RefCell::new(Weak::new()),
                children: RefCell::new(Vec::new()),
                connected: Cell::new(false),
                connect_hooks: RefCell::new(Vec::new()),
                bin: DisposalBin::new(),
                listeners: RefCell::new(Vec::new()),
                next_subscription: Cell::new(1),
                slots: RefCell::new(HashMap::new()),
                attributes: Attributes::default(),
                events: EventTarget::default(),
            }),
        }
    }

    /// Create a root host carrying `config` for its whole subtree.
    pub fn root(name: impl Into<String>, config: RuntimeConfig) -> Self {
        let host = Self::new(name);
        *host.inner.config.borrow_mut() = Some(Rc::new(config));
        host
    }

    pub fn id(&self) -> HostId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn downgrade(&self) -> WeakHost {
        WeakHost {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn parent(&self) -> Option<Host> {
        self.inner.parent.borrow().upgrade().map(|inner| Host { inner })
    }

    pub fn children(&self) -> Vec<Host> {
        self.inner.children.borrow().clone()
    }

    /// Nearest configuration up the parent chain, or the default.
    pub fn config(&self) -> Rc<RuntimeConfig> {
        let mut current = Some(self.clone());
        while let Some(host) = current {
            if let Some(config) = host.inner.config.borrow().as_ref() {
                return config.clone();
            }
            current = host.parent();
        }
        Rc::new(RuntimeConfig::default())
    }

    // -- Tree --

    /// Append `child`, detaching it from any previous parent. The child
    /// connects immediately if this host is connected.
    pub fn append_child(&self, child: &Host) {
        if Rc::ptr_eq(&self.inner, &child.inner) {
            tracing::warn!(host = %self.id(), "refusing to append a host to itself");
            return;
        }
        child.remove();
        *child.inner.parent.borrow_mut() = Rc::downgrade(&self.inner);
        self.inner.children.borrow_mut().push(child.clone());
        if self.is_connected() {
            child.connect_tree();
        }
    }

    /// Remove `child` from this host, disconnecting it first.
    pub fn remove_child(&self, child: &Host) -> bool {
        let position = self
            .inner
            .children
            .borrow()
            .iter()
            .position(|c| Rc::ptr_eq(&c.inner, &child.inner));
        let Some(position) = position else {
            return false;
        };
        child.disconnect_tree();
        self.inner.children.borrow_mut().remove(position);
        *child.inner.parent.borrow_mut() = Weak::new();
        true
    }

    /// Detach this host from its parent (if any).
    pub fn remove(&self) {
        if let Some(parent) = self.parent() {
            parent.remove_child(self);
        }
    }

    // -- Lifecycle --

    /// Connect this host and its subtree.
    ///
    /// Only detached hosts (roots) connect directly; a child connects
    /// when its parent does.
    pub fn connect(&self) {
        if let Some(parent) = self.parent()
            && !parent.is_connected()
        {
            tracing::debug!(host = %self.id(), "parent not connected, deferring connect");
            return;
        }
        self.connect_tree();
    }

    /// Disconnect this host and its subtree.
    pub fn disconnect(&self) {
        self.disconnect_tree();
    }

    fn connect_tree(&self) {
        if self.is_connected() {
            return;
        }
        self.inner.connected.set(true);
        tracing::trace!(host = %self.id(), name = %self.name(), "connected");

        let hooks = self.inner.connect_hooks.borrow().clone();
        for (id, hook) in hooks {
            if !self.is_connected() {
                break;
            }
            // Skip hooks removed by an earlier hook in this pass.
            if self.inner.connect_hooks.borrow().iter().any(|(h, _)| *h == id) {
                hook(self);
            }
        }
        for child in self.children() {
            if !self.is_connected() {
                break;
            }
            child.connect_tree();
        }
    }

    fn disconnect_tree(&self) {
        if !self.is_connected() {
            return;
        }
        self.inner.connected.set(false);
        for child in self.children().iter().rev() {
            child.disconnect_tree();
        }
        self.inner.bin.empty();
        tracing::trace!(host = %self.id(), name = %self.name(), "disconnected");
    }

    /// Run `hook` on every connect. Runs immediately if already connected.
    ///
    /// Hooks receive the host rather than capturing it, so they do not
    /// keep it alive.
    pub fn on_connect(&self, hook: impl Fn(&Host) + 'static) -> SubscriptionId {
        let id = self.next_subscription();
        let hook: ConnectHook = Rc::new(hook);
        self.inner.connect_hooks.borrow_mut().push((id, hook.clone()));
        if self.is_connected() {
            hook(self);
        }
        id
    }

    pub fn remove_connect_hook(&self, id: SubscriptionId) -> bool {
        let mut hooks = self.inner.connect_hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(h, _)| *h != id);
        hooks.len() != before
    }

    /// Run `callback` at the next disconnect.
    pub fn on_disconnect(&self, callback: impl FnOnce() + 'static) -> DisposalId {
        self.inner.bin.add(callback)
    }

    /// Drop a callback registered with [`on_disconnect`](Self::on_disconnect)
    /// without running it.
    pub fn cancel_disconnect(&self, id: DisposalId) -> bool {
        self.inner.bin.remove(id)
    }

    pub(crate) fn connect_hook_count(&self) -> usize {
        self.inner.connect_hooks.borrow().len()
    }

    pub(crate) fn pending_disconnect_count(&self) -> usize {
        self.inner.bin.len()
    }

    // -- Discovery listeners --

    /// Listen for discovery signals of `kind` reaching this host.
    pub fn listen(
        &self,
        kind: SignalKind,
        handler: impl Fn(&Host, &Signal) -> Claim + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription();
        self.inner.listeners.borrow_mut().push(Listener {
            id,
            kind,
            handler: Rc::new(handler),
        });
        id
    }

    pub fn unlisten(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Walk outward from this host and offer `signal` to each connected
    /// host's listeners of the same kind. The first listener that accepts
    /// stops the walk; its host id is returned.
    pub fn dispatch(&self, signal: &Signal) -> Option<HostId> {
        let mut current = Some(self.clone());
        while let Some(host) = current {
            if host.is_connected() {
                let handlers: Vec<SignalHandler> = host
                    .inner
                    .listeners
                    .borrow()
                    .iter()
                    .filter(|l| l.kind == signal.kind())
                    .map(|l| l.handler.clone())
                    .collect();
                for handler in handlers {
                    if handler(&host, signal) == Claim::Accepted {
                        return Some(host.id());
                    }
                }
            }
            current = host.parent();
        }
        None
    }

    // -- Slots --

    /// Per-host singleton keyed by `key`; `init` runs only on first use.
    pub(crate) fn slot<T: 'static>(&self, key: SlotKey, init: impl FnOnce() -> Rc<T>) -> Rc<T> {
        let existing = self.inner.slots.borrow().get(&key).cloned();
        if let Some(existing) = existing {
            match existing.downcast::<T>() {
                Ok(value) => return value,
                Err(_) => {
                    tracing::warn!(host = %self.id(), ?key, "slot holds a different type, replacing");
                }
            }
        }
        let value = init();
        self.inner
            .slots
            .borrow_mut()
            .insert(key, value.clone() as Rc<dyn Any>);
        value
    }

    // -- Attributes --

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.inner.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.inner.attributes.get(name).is_some()
    }

    /// Snapshot of all attributes, sorted by name.
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.inner.attributes.snapshot()
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<String>) -> Result<(), HostError> {
        self.inner.attributes.set(name, value.into())
    }

    pub fn remove_attribute(&self, name: &str) -> bool {
        self.inner.attributes.remove(name)
    }

    /// Boolean attribute: present with an empty value, or absent.
    pub fn toggle_attribute(&self, name: &str, present: bool) -> Result<(), HostError> {
        if present {
            self.set_attribute(name, "")
        } else {
            self.remove_attribute(name);
            Ok(())
        }
    }

    /// Observe attribute mutations on this host.
    pub fn observe_attributes(
        &self,
        observer: impl Fn(&AttributeChange) + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription();
        self.inner.attributes.observe(id, Rc::new(observer));
        id
    }

    pub fn unobserve_attributes(&self, id: SubscriptionId) -> bool {
        self.inner.attributes.unobserve(id)
    }

    pub(crate) fn attribute_observer_count(&self) -> usize {
        self.inner.attributes.observer_count()
    }

    // -- Events --

    pub fn add_event_listener(
        &self,
        kind: impl Into<String>,
        listener: impl Fn(&Rc<Event>) + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription();
        self.inner.events.add(id, kind.into(), Rc::new(listener));
        id
    }

    pub fn remove_event_listener(&self, id: SubscriptionId) -> bool {
        self.inner.events.remove(id)
    }

    /// Deliver `event` to this host's listeners for its kind. The same
    /// `Rc` is handed to every listener. Returns how many were invoked.
    pub fn emit(&self, event: &Rc<Event>) -> usize {
        self.inner.events.emit(event)
    }

    fn next_subscription(&self) -> SubscriptionId {
        let id = self.inner.next_subscription.get();
        self.inner.next_subscription.set(id + 1);
        SubscriptionId(id)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Host {}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("connected", &self.is_connected())
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Host, Host, Host) {
        let root = Host::root("player", RuntimeConfig::default());
        let mid = Host::new("controls");
        let leaf = Host::new("button");
        root.append_child(&mid);
        mid.append_child(&leaf);
        (root, mid, leaf)
    }

    #[test]
    fn connect_cascades_to_children() {
        let (root, mid, leaf) = tree();
        assert!(!leaf.is_connected());
        root.connect();
        assert!(root.is_connected() && mid.is_connected() && leaf.is_connected());
        root.disconnect();
        assert!(!root.is_connected() && !mid.is_connected() && !leaf.is_connected());
    }

    #[test]
    fn child_cannot_connect_without_parent() {
        let (_root, mid, leaf) = tree();
        leaf.connect();
        assert!(!leaf.is_connected());
        assert!(!mid.is_connected());
    }

    #[test]
    fn appending_to_connected_parent_connects_child() {
        let root = Host::root("player", RuntimeConfig::default());
        root.connect();
        let child = Host::new("child");
        root.append_child(&child);
        assert!(child.is_connected());
        assert_eq!(child.parent(), Some(root.clone()));
        assert!(root.remove_child(&child));
        assert!(!child.is_connected());
        assert!(child.parent().is_none());
    }

    #[test]
    fn connect_hooks_run_on_every_connect() {
        let root = Host::root("player", RuntimeConfig::default());
        let count = Rc::new(Cell::new(0));
        {
            let count = count.clone();
            root.on_connect(move |_| count.set(count.get() + 1));
        }
        root.connect();
        root.disconnect();
        root.connect();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn removed_hooks_and_cancelled_callbacks_do_not_run() {
        let root = Host::root("player", RuntimeConfig::default());
        let count = Rc::new(Cell::new(0));
        let hook = {
            let count = count.clone();
            root.on_connect(move |_| count.set(count.get() + 1))
        };
        root.connect();
        let callback = {
            let count = count.clone();
            root.on_disconnect(move || count.set(count.get() + 10))
        };
        assert!(root.remove_connect_hook(hook));
        assert!(root.cancel_disconnect(callback));
        assert_eq!(root.connect_hook_count(), 0);
        assert_eq!(root.pending_disconnect_count(), 0);

        root.disconnect();
        root.connect();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn disconnect_callbacks_run_children_first() {
        let (root, mid, leaf) = tree();
        root.connect();
        let log = Rc::new(RefCell::new(Vec::new()));
        for host in [&root, &mid, &leaf] {
            let log = log.clone();
            let name = host.name().to_string();
            host.on_disconnect(move || log.borrow_mut().push(name));
        }
        root.disconnect();
        assert_eq!(*log.borrow(), vec!["button", "controls", "player"]);
    }

    #[test]
    fn config_is_inherited_from_root() {
        let config = RuntimeConfig {
            dev_warnings: false,
            max_reentrant_writes: 7,
        };
        let root = Host::root("player", config);
        let child = Host::new("child");
        root.append_child(&child);
        assert_eq!(child.config().max_reentrant_writes, 7);
        assert_eq!(
            Host::new("orphan").config().max_reentrant_writes,
            crate::config::DEFAULT_MAX_REENTRANT_WRITES
        );
    }

    #[test]
    fn slot_initializes_once() {
        let host = Host::new("h");
        let key = SlotKey::Named("test");
        let first = host.slot(key, || Rc::new(Cell::new(1)));
        first.set(5);
        let second = host.slot(key, || Rc::new(Cell::new(1)));
        assert_eq!(second.get(), 5);
    }

    #[test]
    fn attributes_notify_observers() {
        let host = Host::new("h");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let id = {
            let seen = seen.clone();
            host.observe_attributes(move |change| seen.borrow_mut().push(change.clone()))
        };
        host.set_attribute("title", "intro").unwrap();
        host.toggle_attribute("muted", true).unwrap();
        host.remove_attribute("title");
        assert!(host.unobserve_attributes(id));
        host.set_attribute("late", "x").unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], AttributeChange::set("title", "intro"));
        assert_eq!(seen[1], AttributeChange::set("muted", ""));
        assert_eq!(seen[2], AttributeChange::removed("title"));
        assert_eq!(
            host.attributes(),
            vec![
                ("late".to_string(), "x".to_string()),
                ("muted".to_string(), String::new())
            ]
        );
    }

    #[test]
    fn invalid_attribute_name_rejected() {
        let host = Host::new("h");
        assert_eq!(
            host.set_attribute("bad name", "x"),
            Err(HostError::InvalidAttributeName("bad name".into()))
        );
        assert!(host.attributes().is_empty());
    }

    #[test]
    fn events_reach_matching_listeners_only() {
        let host = Host::new("h");
        let hits = Rc::new(Cell::new(0));
        {
            let hits = hits.clone();
            host.add_event_listener("play", move |_| hits.set(hits.get() + 1));
        }
        host.add_event_listener("pause", |_| panic!("wrong listener"));
        let delivered = host.emit(&Rc::new(Event::new("play")));
        assert_eq!(delivered, 1);
        assert_eq!(hits.get(), 1);
    }
}
