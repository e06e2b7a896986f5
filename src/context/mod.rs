//! Context: one provider, many consumers, no direct references.
//!
//! A [`Context`] is a shared template identified by its [`ContextId`].
//! A host claims it with [`Context::provide`]; descendants (or the host
//! itself) subscribe with [`Context::consume`], which dispatches a
//! discovery signal up the tree. The nearest provider accepts the
//! consumer, syncs its current value into it and from then on pushes
//! every write before `set` returns.
//!
//! Change detection uses `PartialEq`: a consumer is notified when its
//! transformed value differs from the previous one. [`Notify::Always`]
//! opts out and notifies on every write.
//!
//! A write issued while the same provider is still propagating (e.g.
//! from an `on_update` callback) is queued and applied after the current
//! pass, before the outer `set` returns.

mod derived;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use derived::Derivation;

use crate::config::RuntimeConfig;
use crate::discovery::{Claim, Registration, RegistrationState, Signal, SignalKind, register};
use crate::disposal::Teardown;
use crate::host::{Host, HostId, SlotKey};

/// Process-unique context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// When a consumer's `on_update` fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Notify {
    /// Only when the transformed value is unequal to the previous one.
    #[default]
    OnChange,
    /// On every write, including writes of an equal value.
    Always,
}

/// Shared context template.
pub struct Context<T: 'static> {
    id: ContextId,
    name: &'static str,
    initial: Rc<dyn Fn() -> T>,
    derivation: Option<Rc<Derivation<T>>>,
}

impl<T: 'static> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name,
            initial: self.initial.clone(),
            derivation: self.derivation.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("derived", &self.derivation.is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Context<T> {
    pub fn new(name: &'static str, initial: T) -> Self {
        Self::with_factory(name, move || initial.clone())
    }

    /// Context whose initial value is built fresh on every use.
    pub fn with_factory(name: &'static str, factory: impl Fn() -> T + 'static) -> Self {
        Self {
            id: ContextId::next(),
            name,
            initial: Rc::new(factory),
            derivation: None,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_derived(&self) -> bool {
        self.derivation.is_some()
    }

    pub fn initial_value(&self) -> T {
        (self.initial)()
    }

    /// Claim this context on `host`. Idempotent per host.
    pub fn provide(&self, host: &Host) -> Provider<T> {
        let context = self.clone();
        let state = host.slot(SlotKey::Context(self.id), || {
            let state = Rc::new(ProviderState::new(context, host.id(), host.config()));
            ProviderState::install(&state, host);
            state
        });
        Provider { state }
    }

    /// Consume with a transform and callbacks.
    pub fn consume_with<U: Clone + PartialEq + 'static>(
        &self,
        host: &Host,
        options: ConsumeOptions<T, U>,
    ) -> Consumer<T, U> {
        let initial = (options.transform)(&self.initial_value());
        let link = Rc::new(ConsumerLink {
            transform: options.transform,
            on_update: options.on_update,
            on_release: options.on_release,
            notify: options.notify,
            value: RefCell::new(initial.clone()),
            initial,
            attached: Cell::new(false),
        });
        let offer: Rc<dyn Any> = Rc::new(ConsumerOffer::<T> { sink: link.clone() });
        let registration = register(host, SignalKind::Context(self.id), offer);
        if host.is_connected() && registration.state() != RegistrationState::Registered {
            tracing::debug!(context = self.name, host = %host.id(), "no provider, keeping initial value");
        }
        Consumer { link, registration }
    }
}

impl<T: Clone + PartialEq + 'static> Context<T> {
    /// Consume the raw value.
    pub fn consume(&self, host: &Host) -> Consumer<T, T> {
        self.consume_with(host, ConsumeOptions::identity())
    }
}

/// Options for [`Context::consume_with`].
pub struct ConsumeOptions<T, U> {
    transform: Box<dyn Fn(&T) -> U>,
    on_update: Option<Box<dyn Fn(&U)>>,
    on_release: Option<Box<dyn Fn()>>,
    notify: Notify,
}

impl<T: Clone + 'static> ConsumeOptions<T, T> {
    pub fn identity() -> Self {
        Self::map(T::clone)
    }
}

impl<T: Clone + 'static> Default for ConsumeOptions<T, T> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<T: 'static, U: 'static> ConsumeOptions<T, U> {
    /// Apply `transform` to every incoming value, including the initial one.
    pub fn map(transform: impl Fn(&T) -> U + 'static) -> Self {
        Self {
            transform: Box::new(transform),
            on_update: None,
            on_release: None,
            notify: Notify::OnChange,
        }
    }

    pub fn on_update(mut self, callback: impl Fn(&U) + 'static) -> Self {
        self.on_update = Some(Box::new(callback));
        self
    }

    pub fn notify(mut self, notify: Notify) -> Self {
        self.notify = notify;
        self
    }

    /// Replace the default "fall back to initial" behaviour on release.
    pub(crate) fn on_release(mut self, callback: impl Fn() + 'static) -> Self {
        self.on_release = Some(Box::new(callback));
        self
    }
}

/// Provider-side view of one consumer.
trait Sink<T> {
    fn attach(&self);
    fn update(&self, value: &T);
    /// The provider went away.
    fn release(&self);
    /// The consumer's own host went away.
    fn detach(&self);
}

struct ConsumerOffer<T> {
    sink: Rc<dyn Sink<T>>,
}

struct ConsumerLink<T, U> {
    transform: Box<dyn Fn(&T) -> U>,
    on_update: Option<Box<dyn Fn(&U)>>,
    on_release: Option<Box<dyn Fn()>>,
    notify: Notify,
    initial: U,
    value: RefCell<U>,
    attached: Cell<bool>,
}

impl<T, U: Clone + PartialEq> ConsumerLink<T, U> {
    fn store(&self, next: U) {
        let changed = *self.value.borrow() != next;
        if !changed && self.notify == Notify::OnChange {
            return;
        }
        *self.value.borrow_mut() = next.clone();
        if let Some(on_update) = &self.on_update {
            on_update(&next);
        }
    }

    fn fall_back(&self) {
        if let Some(on_release) = &self.on_release {
            on_release();
        }
        *self.value.borrow_mut() = self.initial.clone();
    }
}

impl<T, U: Clone + PartialEq> Sink<T> for ConsumerLink<T, U> {
    fn attach(&self) {
        self.attached.set(true);
    }

    fn update(&self, value: &T) {
        if !self.attached.get() {
            return;
        }
        self.store((self.transform)(value));
    }

    fn release(&self) {
        if !self.attached.get() {
            return;
        }
        if self.on_release.is_some() {
            self.fall_back();
        } else {
            self.store(self.initial.clone());
        }
    }

    fn detach(&self) {
        if self.attached.replace(false) {
            self.fall_back();
        }
    }
}

/// Read-only handle held by a consuming host.
///
/// Dropping the handle unsubscribes it.
pub struct Consumer<T: 'static, U: 'static = T> {
    link: Rc<ConsumerLink<T, U>>,
    registration: Registration,
}

impl<T: 'static, U: Clone + 'static> Consumer<T, U> {
    pub fn get(&self) -> U {
        self.link.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&U) -> R) -> R {
        f(&self.link.value.borrow())
    }

    /// Whether a provider currently feeds this consumer.
    pub fn is_bound(&self) -> bool {
        self.registration.state() == RegistrationState::Registered
    }

    /// Host of the provider feeding this consumer.
    pub fn provider_host(&self) -> Option<HostId> {
        self.registration.owner()
    }

    /// Unsubscribe now.
    pub fn close(&self) {
        self.registration.close();
    }
}

impl<T: 'static, U: 'static> fmt::Debug for Consumer<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("registration", &self.registration)
            .finish()
    }
}

struct Subscriber<T> {
    key: u64,
    origin: HostId,
    sink: Rc<dyn Sink<T>>,
    teardown: Rc<Teardown>,
}

struct ProviderState<T: 'static> {
    context: Context<T>,
    host: HostId,
    config: Rc<RuntimeConfig>,
    value: RefCell<T>,
    subscribers: RefCell<Vec<Subscriber<T>>>,
    next_key: Cell<u64>,
    propagating: Cell<bool>,
    pending: RefCell<VecDeque<T>>,
    /// Source consumers of a derived context, kept alive with the provider.
    sources: RefCell<Vec<Box<dyn Any>>>,
}

/// Resets the propagating flag even if a callback panics.
struct PropagationGuard<'a>(&'a Cell<bool>);

impl<'a> PropagationGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for PropagationGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: Clone + 'static> ProviderState<T> {
    fn new(context: Context<T>, host: HostId, config: Rc<RuntimeConfig>) -> Self {
        let value = context.initial_value();
        Self {
            context,
            host,
            config,
            value: RefCell::new(value),
            subscribers: RefCell::new(Vec::new()),
            next_key: Cell::new(1),
            propagating: Cell::new(false),
            pending: RefCell::new(VecDeque::new()),
            sources: RefCell::new(Vec::new()),
        }
    }

    fn install(state: &Rc<Self>, host: &Host) {
        let kind = SignalKind::Context(state.context.id);
        let weak = Rc::downgrade(state);
        host.on_connect(move |host| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let handler = Rc::downgrade(&state);
            let listener = host.listen(kind, move |owner, signal| {
                handler
                    .upgrade()
                    .map_or(Claim::Ignored, |state| state.accept(owner, signal))
            });
            let owner = host.downgrade();
            let weak = Rc::downgrade(&state);
            host.on_disconnect(move || {
                if let Some(owner) = owner.upgrade() {
                    owner.unlisten(listener);
                }
                if let Some(state) = weak.upgrade() {
                    state.release_all();
                }
            });
        });
        if let Some(derivation) = state.context.derivation.clone() {
            derivation.bind(state, host);
        }
    }

    fn accept(self: &Rc<Self>, owner: &Host, signal: &Signal) -> Claim {
        let Some(offer) = signal.payload::<ConsumerOffer<T>>() else {
            if self.config.dev_warnings {
                tracing::warn!(
                    context = self.context.name,
                    origin = %signal.origin().id(),
                    "consumer payload does not match the provider's value type"
                );
            }
            return Claim::Ignored;
        };
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        let sink = offer.sink.clone();
        let teardown = {
            let weak = Rc::downgrade(self);
            let sink = sink.clone();
            signal.accept(owner, move || {
                if let Some(state) = weak.upgrade() {
                    state.unsubscribe(key);
                }
                sink.detach();
            })
        };
        self.subscribers.borrow_mut().push(Subscriber {
            key,
            origin: signal.origin().id(),
            sink: sink.clone(),
            teardown,
        });
        tracing::trace!(
            context = self.context.name,
            provider = %self.host,
            consumer = %signal.origin().id(),
            "consumer bound"
        );

        sink.attach();
        let current = self.value.borrow().clone();
        sink.update(&current);
        Claim::Accepted
    }

    fn unsubscribe(&self, key: u64) {
        self.subscribers.borrow_mut().retain(|s| s.key != key);
    }

    fn release_all(&self) {
        let subscribers: Vec<(Rc<dyn Sink<T>>, Rc<Teardown>)> = self
            .subscribers
            .borrow()
            .iter()
            .map(|s| (s.sink.clone(), s.teardown.clone()))
            .collect();
        for (sink, teardown) in subscribers {
            sink.release();
            teardown.run();
        }
        self.pending.borrow_mut().clear();
        *self.value.borrow_mut() = self.context.initial_value();
        tracing::trace!(context = self.context.name, provider = %self.host, "provider released");
    }

    fn write(&self, value: T) {
        if self.propagating.get() {
            self.pending.borrow_mut().push_back(value);
            return;
        }
        let _guard = PropagationGuard::enter(&self.propagating);
        *self.value.borrow_mut() = value;
        self.propagate();

        let mut chained = 0usize;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(next) = next else {
                break;
            };
            chained += 1;
            if chained > self.config.max_reentrant_writes {
                let dropped = self.pending.borrow().len() + 1;
                self.pending.borrow_mut().clear();
                if self.config.dev_warnings {
                    tracing::warn!(
                        context = self.context.name,
                        dropped,
                        limit = self.config.max_reentrant_writes,
                        "re-entrant write limit reached, dropping writes"
                    );
                }
                break;
            }
            *self.value.borrow_mut() = next;
            self.propagate();
        }
    }

    fn propagate(&self) {
        let value = self.value.borrow().clone();
        let sinks: Vec<Rc<dyn Sink<T>>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|s| s.sink.clone())
            .collect();
        for sink in sinks {
            sink.update(&value);
        }
    }
}

/// Write handle held by the providing host. Clones share state.
pub struct Provider<T: 'static> {
    state: Rc<ProviderState<T>>,
}

impl<T: 'static> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + 'static> Provider<T> {
    pub fn context(&self) -> &Context<T> {
        &self.state.context
    }

    pub fn host_id(&self) -> HostId {
        self.state.host
    }

    pub fn get(&self) -> T {
        self.state.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.value.borrow())
    }

    /// Store `value` and push it to every bound consumer.
    pub fn set(&self, value: T) {
        self.state.write(value);
    }

    /// Modify a copy of the current value and write it back.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Write the context's initial value.
    pub fn reset(&self) {
        self.set(self.state.context.initial_value());
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.borrow().len()
    }

    /// Hosts of the currently bound consumers.
    pub fn subscriber_hosts(&self) -> Vec<HostId> {
        self.state
            .subscribers
            .borrow()
            .iter()
            .map(|s| s.origin)
            .collect()
    }
}

impl<T: 'static> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("context", &self.state.context.name)
            .field("host", &self.state.host)
            .field("subscribers", &self.state.subscribers.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Host {
        Host::root("player", RuntimeConfig::default())
    }

    fn child(parent: &Host, name: &str) -> Host {
        let host = Host::new(name);
        parent.append_child(&host);
        host
    }

    fn log_updates<T: Clone + PartialEq + 'static>(
        ctx: &Context<T>,
        host: &Host,
    ) -> (Consumer<T>, Rc<RefCell<Vec<T>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let consumer = ctx.consume_with(
            host,
            ConsumeOptions::identity().on_update(move |v: &T| sink.borrow_mut().push(v.clone())),
        );
        (consumer, log)
    }

    #[test]
    fn consumers_before_and_after_write_see_latest() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        let early = child(&root, "early");
        let early_consumer = ctx.consume(&early);
        root.connect();

        provider.set(5);
        assert_eq!(early_consumer.get(), 5);

        let late = child(&root, "late");
        let late_consumer = ctx.consume(&late);
        assert_eq!(late_consumer.get(), 5);
        assert!(late_consumer.is_bound());
        assert_eq!(late_consumer.provider_host(), Some(root.id()));
    }

    #[test]
    fn each_consumer_notified_once_per_write_in_order() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let (_a, log_a) = log_updates(&ctx, &child(&root, "a"));
        let (_b, log_b) = log_updates(&ctx, &child(&root, "b"));

        provider.set(1);
        provider.set(2);
        assert_eq!(*log_a.borrow(), vec![1, 2]);
        assert_eq!(*log_b.borrow(), vec![1, 2]);
    }

    #[test]
    fn equal_writes_are_not_propagated_unless_always() {
        let ctx = Context::new("label", String::from("idle"));
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let (_c, changes) = log_updates(&ctx, &child(&root, "c"));
        let always_log = Rc::new(RefCell::new(Vec::new()));
        let _always = {
            let sink = always_log.clone();
            ctx.consume_with(
                &child(&root, "d"),
                ConsumeOptions::identity()
                    .notify(Notify::Always)
                    .on_update(move |v: &String| sink.borrow_mut().push(v.clone())),
            )
        };

        provider.set("playing".into());
        provider.set("playing".into());
        assert_eq!(*changes.borrow(), vec!["playing".to_string()]);
        // Attach sync plus two writes.
        assert_eq!(always_log.borrow().len(), 3);
    }

    #[test]
    fn transform_applies_to_initial_and_updates() {
        let ctx = Context::new("volume", 0.25_f64);
        let root = root();
        let host = child(&root, "meter");
        let percent = ctx.consume_with(&host, ConsumeOptions::map(|v: &f64| (v * 100.0).round() as u32));
        assert_eq!(percent.get(), 25);

        let provider = ctx.provide(&root);
        root.connect();
        provider.set(0.5);
        assert_eq!(percent.get(), 50);
    }

    #[test]
    fn consumer_without_provider_keeps_initial() {
        let ctx = Context::new("count", 9);
        let root = root();
        root.connect();
        let consumer = ctx.consume(&child(&root, "lonely"));
        assert_eq!(consumer.get(), 9);
        assert!(!consumer.is_bound());
    }

    #[test]
    fn provide_is_idempotent_per_host() {
        let ctx = Context::new("count", 0);
        let root = root();
        let first = ctx.provide(&root);
        let second = ctx.provide(&root);
        first.set(3);
        assert_eq!(second.get(), 3);
    }

    #[test]
    fn nearest_provider_wins() {
        let ctx = Context::new("count", 0);
        let outer = root();
        let inner = child(&outer, "inner");
        let leaf = child(&inner, "leaf");
        let outer_provider = ctx.provide(&outer);
        let inner_provider = ctx.provide(&inner);
        outer.connect();
        let consumer = ctx.consume(&leaf);
        outer_provider.set(1);
        inner_provider.set(2);
        assert_eq!(consumer.get(), 2);
        assert_eq!(consumer.provider_host(), Some(inner.id()));
    }

    #[test]
    fn provider_disconnect_reverts_consumers_to_initial() {
        let ctx = Context::new("count", 0);
        let player = root();
        let provider = ctx.provide(&player);
        player.connect();
        let (own, own_log) = log_updates(&ctx, &player);
        let inner = ctx.consume(&child(&player, "inside"));
        provider.set(4);
        assert_eq!(inner.get(), 4);

        player.disconnect();
        assert_eq!(*own_log.borrow(), vec![4, 0]);
        assert_eq!(own.get(), 0);
        assert_eq!(inner.get(), 0);
        assert_eq!(provider.get(), 0);
        assert_eq!(provider.subscriber_count(), 0);
        assert!(!own.is_bound());

        player.connect();
        assert!(own.is_bound());
        assert_eq!(provider.subscriber_count(), 2);
    }

    #[test]
    fn moved_consumer_rebinds_to_new_nearest_provider() {
        let ctx = Context::new("count", 0);
        let app = root();
        let left = child(&app, "left");
        let right = child(&app, "right");
        let left_provider = ctx.provide(&left);
        let right_provider = ctx.provide(&right);
        app.connect();
        left_provider.set(1);
        right_provider.set(2);

        let host = child(&left, "leaf");
        let consumer = ctx.consume(&host);
        assert_eq!(consumer.get(), 1);
        right.append_child(&host);
        assert_eq!(consumer.get(), 2);
        assert_eq!(left_provider.subscriber_count(), 0);
        assert_eq!(right_provider.subscriber_hosts(), vec![host.id()]);
    }

    #[test]
    fn disconnected_consumer_receives_nothing() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let host = child(&root, "c");
        let (_consumer, log) = log_updates(&ctx, &host);
        provider.set(1);
        root.remove_child(&host);
        provider.set(2);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(provider.subscriber_count(), 0);
    }

    #[test]
    fn dropping_consumer_unsubscribes() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let consumer = ctx.consume(&child(&root, "c"));
        assert_eq!(provider.subscriber_count(), 1);
        drop(consumer);
        assert_eq!(provider.subscriber_count(), 0);
    }

    #[test]
    fn consume_and_drop_cycles_leave_host_bookkeeping_flat() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let leaf = child(&root, "leaf");
        let hooks = leaf.connect_hook_count();
        let callbacks = leaf.pending_disconnect_count();
        for _ in 0..1000 {
            let consumer = ctx.consume(&leaf);
            assert!(consumer.is_bound());
            drop(consumer);
        }
        assert_eq!(leaf.connect_hook_count(), hooks);
        assert_eq!(leaf.pending_disconnect_count(), callbacks);
        assert_eq!(provider.subscriber_count(), 0);
    }

    #[test]
    fn consumer_unsubscribing_mid_pass_gets_no_late_update() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let victim_host = child(&root, "victim");
        let killer_host = child(&root, "killer");
        let _killer = {
            let root = root.clone();
            let victim_host = victim_host.clone();
            ctx.consume_with(
                &killer_host,
                ConsumeOptions::identity().on_update(move |_: &i32| {
                    root.remove_child(&victim_host);
                }),
            )
        };
        let (_victim, log) = log_updates(&ctx, &victim_host);
        provider.set(1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn reentrant_write_is_applied_after_current_pass() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let order = Rc::new(RefCell::new(Vec::new()));
        let _clamp = {
            let provider = provider.clone();
            let order = order.clone();
            ctx.consume_with(
                &child(&root, "clamp"),
                ConsumeOptions::identity().on_update(move |v: &i32| {
                    order.borrow_mut().push(format!("clamp saw {v}"));
                    if *v > 10 {
                        provider.set(10);
                    }
                }),
            )
        };
        let _observer = {
            let order = order.clone();
            ctx.consume_with(
                &child(&root, "observer"),
                ConsumeOptions::identity()
                    .on_update(move |v: &i32| order.borrow_mut().push(format!("observer saw {v}"))),
            )
        };
        provider.set(50);
        assert_eq!(provider.get(), 10);
        assert_eq!(
            *order.borrow(),
            vec!["clamp saw 50", "observer saw 50", "clamp saw 10", "observer saw 10"]
        );
    }

    #[test]
    fn runaway_reentrant_writes_are_capped() {
        let ctx = Context::new("count", 0);
        let root = Host::root(
            "player",
            RuntimeConfig {
                dev_warnings: true,
                max_reentrant_writes: 5,
            },
        );
        let provider = ctx.provide(&root);
        root.connect();
        let _echo = {
            let provider = provider.clone();
            ctx.consume_with(
                &child(&root, "echo"),
                ConsumeOptions::identity().on_update(move |v: &i32| provider.set(v + 1)),
            )
        };
        provider.set(1);
        // The initial write plus five chained ones.
        assert_eq!(provider.get(), 6);
    }

    #[test]
    fn remount_resyncs_consumer() {
        let ctx = Context::new("count", 0);
        let root = root();
        let provider = ctx.provide(&root);
        root.connect();
        let host = child(&root, "c");
        let consumer = ctx.consume(&host);
        provider.set(3);
        root.remove_child(&host);
        assert_eq!(consumer.get(), 0);
        provider.set(8);
        root.append_child(&host);
        assert_eq!(consumer.get(), 8);
    }
}
