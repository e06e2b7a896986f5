//! Provider bridge: the player side of the engine handshake.
//!
//! A [`MediaBridge`] attached to a player host accepts engine
//! registrations from its subtree. Until an engine is connected, property
//! writes and method calls are buffered per name in a [`RequestQueue`].
//! Connecting an engine:
//!
//! 1. tears down the previous engine's forwarding (its disposal bin),
//! 2. attaches the `media-state` provider to the new engine,
//! 3. re-dispatches the engine's bridged events on the player host (the
//!    same event instance reaches player listeners),
//! 4. copies the player's attributes onto the engine host, then mirrors
//!    every later set/removal,
//! 5. flushes the queue and switches it to serve-immediately, running
//!    anything the flushed commands queued in turn.
//!
//! Disconnecting the engine empties the bin and puts the queue back into
//! buffering mode, discarding anything stale.

mod engine;
mod manifest;
mod state;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub use engine::{EngineOffer, MediaEngine, MemoryEngine, announce_engine};
pub use manifest::{
    BridgedMethod, BridgedProperty, MEDIA_EVENTS, Manifest, PropertyEntry, PropertyValue, manifest,
};
pub use state::{MediaState, media_state};

use crate::context::{Consumer, Provider};
use crate::discovery::{ActiveRegistry, Manager, ManagerHooks, SignalKind, active_registry};
use crate::disposal::DisposalBin;
use crate::host::{Host, SlotKey, WeakHost};
use crate::queue::RequestQueue;

/// Bridge-level errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("property {0} is read-only")]
    ReadOnly(BridgedProperty),

    #[error("property {property} expects a {expected} value, got {found}")]
    TypeMismatch {
        property: BridgedProperty,
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} is out of range for {property}")]
    OutOfRange { property: BridgedProperty, value: f64 },

    #[error("no media engine connected")]
    NoEngine,
}

struct ConnectedEngine {
    offer: Rc<EngineOffer>,
    host: Host,
}

struct BridgeInner {
    player: WeakHost,
    store: Provider<MediaState>,
    active: Consumer<ActiveRegistry>,
    queue: RequestQueue<BridgeError>,
    bin: DisposalBin,
    current: RefCell<Option<ConnectedEngine>>,
    engines: Manager<EngineOffer>,
}

struct BridgeHooks {
    bridge: Weak<BridgeInner>,
}

impl ManagerHooks<EngineOffer> for BridgeHooks {
    fn added(&self, offer: &Rc<EngineOffer>, host: &Host) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.connect_engine(offer, host);
        }
    }

    fn removed(&self, offer: &Rc<EngineOffer>, _host: &Host) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.disconnect_engine(offer);
        }
    }
}

/// Forwards property, method, attribute and event traffic between a
/// player host and its mounted engine. Clones share state.
#[derive(Clone)]
pub struct MediaBridge {
    inner: Rc<BridgeInner>,
}

impl MediaBridge {
    /// Attach a bridge to `player`. Idempotent per host.
    ///
    /// Also provides the `media-state` context on `player` and consumes the
    /// nearest `active-registry`, if any, so that only one player in that
    /// scope plays at a time.
    pub fn attach(player: &Host) -> Self {
        let inner = player.slot(SlotKey::Named("media-bridge"), || {
            let store = media_state().provide(player);
            let active = active_registry().consume(player);
            Rc::new_cyclic(|weak| BridgeInner {
                player: player.downgrade(),
                store,
                active,
                queue: RequestQueue::new(),
                bin: DisposalBin::new(),
                current: RefCell::new(None),
                engines: Manager::attach(
                    player,
                    SignalKind::MediaProvider,
                    BridgeHooks {
                        bridge: weak.clone(),
                    },
                ),
            })
        });
        Self { inner }
    }

    pub fn player(&self) -> Option<Host> {
        self.inner.player.upgrade()
    }

    /// The `media-state` provider on the player host.
    pub fn store(&self) -> Provider<MediaState> {
        self.inner.store.clone()
    }

    pub fn state(&self) -> MediaState {
        self.inner.store.get()
    }

    /// Read through to the engine, or the declared default without one.
    pub fn get(&self, property: BridgedProperty) -> PropertyValue {
        match self.inner.engine() {
            Some(engine) => engine.property(property),
            None => property.default_value(),
        }
    }

    /// Write a property, buffered under its name until an engine is ready.
    pub fn set(&self, property: BridgedProperty, value: impl Into<PropertyValue>) -> Result<(), BridgeError> {
        if !property.is_writable() {
            return Err(BridgeError::ReadOnly(property));
        }
        let value = value.into();
        let bridge = Rc::downgrade(&self.inner);
        self.inner.queue.queue(property.name(), move || {
            BridgeInner::target(&bridge)?.set_property(property, value)
        })
    }

    /// Call a bridged method, buffered under its name until an engine is ready.
    pub fn call(&self, method: BridgedMethod) -> Result<(), BridgeError> {
        let bridge = Rc::downgrade(&self.inner);
        self.inner.queue.queue(method.name(), move || {
            let engine = BridgeInner::target(&bridge)?;
            match method {
                BridgedMethod::Play => {
                    engine.play()?;
                    if let Some(bridge) = bridge.upgrade() {
                        bridge.claim_active();
                    }
                    Ok(())
                }
                BridgedMethod::Pause => engine.pause(),
            }
        })
    }

    pub fn play(&self) -> Result<(), BridgeError> {
        self.call(BridgedMethod::Play)
    }

    pub fn pause(&self) -> Result<(), BridgeError> {
        self.call(BridgedMethod::Pause)
    }

    /// Name of the connected engine.
    pub fn engine_name(&self) -> Option<String> {
        self.inner.engine().map(|e| e.name().to_string())
    }

    /// Host the connected engine is mounted on.
    pub fn engine_host(&self) -> Option<Host> {
        self.inner.current.borrow().as_ref().map(|c| c.host.clone())
    }

    /// Engines registered with this player, connected or not.
    pub fn engine_count(&self) -> usize {
        self.inner.engines.len()
    }

    /// Whether commands currently reach an engine without buffering.
    pub fn is_ready(&self) -> bool {
        self.inner.queue.is_serving()
    }

    /// Names of buffered requests, in the order they will run.
    pub fn pending_requests(&self) -> Vec<String> {
        self.inner.queue.pending_keys()
    }
}

impl BridgeInner {
    fn engine(&self) -> Option<Rc<dyn MediaEngine>> {
        self.current.borrow().as_ref().map(|c| c.offer.engine.clone())
    }

    fn target(bridge: &Weak<BridgeInner>) -> Result<Rc<dyn MediaEngine>, BridgeError> {
        bridge
            .upgrade()
            .and_then(|b| b.engine())
            .ok_or(BridgeError::NoEngine)
    }

    fn connect_engine(&self, offer: &Rc<EngineOffer>, engine_host: &Host) {
        self.bin.empty();
        let Some(player) = self.player.upgrade() else {
            return;
        };
        let engine = offer.engine.clone();
        engine.attach(self.store.clone());
        {
            let engine = engine.clone();
            self.bin.add(move || engine.detach());
        }
        *self.current.borrow_mut() = Some(ConnectedEngine {
            offer: offer.clone(),
            host: engine_host.clone(),
        });

        for kind in MEDIA_EVENTS {
            let outer = player.downgrade();
            let listener = engine_host.add_event_listener(kind, move |event| {
                if let Some(outer) = outer.upgrade() {
                    outer.emit(event);
                }
            });
            let engine_host = engine_host.downgrade();
            self.bin.add(move || {
                if let Some(engine_host) = engine_host.upgrade() {
                    engine_host.remove_event_listener(listener);
                }
            });
        }

        for (name, value) in player.attributes() {
            if let Err(e) = engine_host.set_attribute(&name, value) {
                tracing::warn!(error = %e, "attribute not copied to engine host");
            }
        }
        let observer = {
            let target = engine_host.downgrade();
            player.observe_attributes(move |change| {
                let Some(target) = target.upgrade() else {
                    return;
                };
                match &change.value {
                    Some(value) => {
                        if let Err(e) = target.set_attribute(&change.name, value.clone()) {
                            tracing::warn!(error = %e, "attribute not forwarded to engine host");
                        }
                    }
                    None => {
                        target.remove_attribute(&change.name);
                    }
                }
            })
        };
        {
            let player = player.downgrade();
            self.bin.add(move || {
                if let Some(player) = player.upgrade() {
                    player.unobserve_attributes(observer);
                }
            });
        }

        tracing::info!(
            player = %player.id(),
            engine = engine.name(),
            engine_host = %engine_host.id(),
            pending = self.queue.len(),
            "media engine connected"
        );
        self.queue.serve();
    }

    fn disconnect_engine(&self, offer: &Rc<EngineOffer>) {
        let is_current = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|c| Rc::ptr_eq(&c.offer, offer));
        if !is_current {
            return;
        }
        self.bin.empty();
        self.current.borrow_mut().take();
        self.queue.reset();
        self.store.reset();
        if let Some(player) = self.player.upgrade() {
            self.release_active(&player);
            tracing::info!(player = %player.id(), engine = offer.engine.name(), "media engine disconnected");
        }
    }

    /// Make this player the active one in its scope; the previous one pauses.
    fn claim_active(self: &Rc<Self>) {
        if !self.active.is_bound() {
            return;
        }
        let Some(player) = self.player.upgrade() else {
            return;
        };
        let bridge = Rc::downgrade(self);
        self.active.get().activate(&player, move || {
            let Ok(engine) = BridgeInner::target(&bridge) else {
                return;
            };
            if let Err(e) = engine.pause() {
                tracing::warn!(error = %e, "pause on deactivation failed");
            }
        });
    }

    fn release_active(&self, player: &Host) {
        if self.active.is_bound() {
            self.active.get().deactivate(player);
        }
    }
}

impl fmt::Debug for MediaBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBridge")
            .field("engine", &self.engine_name())
            .field("ready", &self.is_ready())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::host::Event;

    fn player() -> (Host, MediaBridge) {
        let player = Host::root("player", RuntimeConfig::default());
        let bridge = MediaBridge::attach(&player);
        player.connect();
        (player, bridge)
    }

    fn mount(player: &Host, name: &str) -> (Host, Rc<MemoryEngine>, crate::discovery::Registration) {
        let host = Host::new(format!("{name}-host"));
        player.append_child(&host);
        let (engine, registration) = MemoryEngine::mount(&host, name);
        (host, engine, registration)
    }

    #[test]
    fn commands_buffer_until_engine_connects_then_replay() {
        let (player, bridge) = player();
        bridge.set(BridgedProperty::Volume, 0.2).unwrap();
        bridge.play().unwrap();
        bridge.set(BridgedProperty::Volume, 0.5).unwrap();
        assert_eq!(bridge.pending_requests(), vec!["volume", "play"]);
        assert!(!bridge.is_ready());
        assert_eq!(bridge.get(BridgedProperty::Volume), PropertyValue::Number(1.0));

        let (_host, engine, _registration) = mount(&player, "memory");
        assert!(bridge.is_ready());
        assert!(bridge.pending_requests().is_empty());
        assert_eq!(
            engine.log(),
            vec!["attach", "set volume=0.5", "play"]
        );
        assert_eq!(bridge.get(BridgedProperty::Volume), PropertyValue::Number(0.5));
        assert!(!bridge.state().paused);
        assert_eq!(bridge.engine_name().as_deref(), Some("memory"));

        // Serving now: runs synchronously and returns the engine's result.
        assert!(bridge.set(BridgedProperty::Volume, 2.0).is_err());
        bridge.pause().unwrap();
        assert!(bridge.state().paused);
    }

    #[test]
    fn command_issued_by_a_listener_during_replay_still_runs() {
        let (player, bridge) = player();
        {
            let bridge = bridge.clone();
            player.add_event_listener("play", move |_| {
                bridge.set(BridgedProperty::Volume, 0.3).unwrap();
            });
        }
        bridge.play().unwrap();

        let (_host, engine, _registration) = mount(&player, "memory");
        assert!(bridge.is_ready());
        assert!(bridge.pending_requests().is_empty());
        assert_eq!(bridge.get(BridgedProperty::Volume), PropertyValue::Number(0.3));
        assert_eq!(engine.log(), vec!["attach", "play", "set volume=0.3"]);
    }

    #[test]
    fn read_only_writes_are_rejected_up_front() {
        let (_player, bridge) = player();
        assert_eq!(
            bridge.set(BridgedProperty::Paused, false),
            Err(BridgeError::ReadOnly(BridgedProperty::Paused))
        );
        assert!(bridge.pending_requests().is_empty());
    }

    #[test]
    fn attributes_are_copied_then_mirrored() {
        let (player, bridge) = player();
        player.set_attribute("src", "intro.mp4").unwrap();
        player.toggle_attribute("muted", true).unwrap();
        let (host, engine, _registration) = mount(&player, "memory");
        assert_eq!(host.attribute("src").as_deref(), Some("intro.mp4"));
        assert_eq!(host.attribute("muted").as_deref(), Some(""));
        assert_eq!(engine.snapshot().src, "intro.mp4");
        assert!(bridge.state().muted);

        player.set_attribute("src", "main.mp4").unwrap();
        player.remove_attribute("muted");
        assert_eq!(host.attribute("src").as_deref(), Some("main.mp4"));
        assert!(!host.has_attribute("muted"));
        assert_eq!(bridge.state().src, "main.mp4");
        assert!(!bridge.state().muted);
    }

    #[test]
    fn engine_events_reach_player_with_same_identity() {
        let (player, bridge) = player();
        let (host, _engine, _registration) = mount(&player, "memory");
        let seen: Rc<RefCell<Vec<Rc<Event>>>> = Rc::default();
        {
            let seen = seen.clone();
            player.add_event_listener("volumechange", move |e| seen.borrow_mut().push(e.clone()));
        }
        let event = Rc::new(Event::new("volumechange"));
        host.emit(&event);
        bridge.set(BridgedProperty::Volume, 0.3).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(Rc::ptr_eq(&seen[0], &event));
        assert_eq!(seen[1].detail(), Some(&PropertyValue::Number(0.3)));
    }

    #[test]
    fn unmounting_engine_resets_queue_and_stops_forwarding() {
        let (player, bridge) = player();
        let (host, engine, _registration) = mount(&player, "memory");
        bridge.set(BridgedProperty::Volume, 0.4).unwrap();
        let events = Rc::new(Cell::new(0));
        {
            let events = events.clone();
            player.add_event_listener("volumechange", move |_| events.set(events.get() + 1));
        }

        player.remove_child(&host);
        assert!(!bridge.is_ready());
        assert_eq!(bridge.engine_name(), None);
        assert!(!engine.is_attached());
        assert_eq!(bridge.state(), MediaState::default());
        assert_eq!(bridge.get(BridgedProperty::Volume), PropertyValue::Number(1.0));

        // Commands buffer again; the detached engine sees nothing.
        bridge.set(BridgedProperty::Volume, 0.9).unwrap();
        player.set_attribute("src", "late.mp4").unwrap();
        host.emit(&Rc::new(Event::new("volumechange")));
        assert_eq!(events.get(), 0);
        assert_eq!(engine.snapshot().volume, 0.4);
        assert!(!host.has_attribute("src"));
        assert_eq!(bridge.pending_requests(), vec!["volume"]);
    }

    #[test]
    fn swapping_engines_detaches_previous() {
        let (player, bridge) = player();
        let (_a_host, a, _ra) = mount(&player, "a");
        let (_b_host, b, _rb) = mount(&player, "b");
        assert_eq!(bridge.engine_name().as_deref(), Some("b"));
        assert!(!a.is_attached());
        assert!(b.is_attached());
        bridge.set(BridgedProperty::Muted, true).unwrap();
        assert!(b.snapshot().muted);
        assert!(!a.snapshot().muted);
    }

    #[test]
    fn attach_is_idempotent() {
        let (player, bridge) = player();
        let again = MediaBridge::attach(&player);
        bridge.set(BridgedProperty::Loop, true).unwrap();
        assert_eq!(again.pending_requests(), vec!["loop"]);
    }

    #[test]
    fn playing_one_player_pauses_the_other() {
        let app = Host::root("app", RuntimeConfig::default());
        let _registry = active_registry().provide(&app);
        let first = Host::new("first");
        let second = Host::new("second");
        app.append_child(&first);
        app.append_child(&second);
        let first_bridge = MediaBridge::attach(&first);
        let second_bridge = MediaBridge::attach(&second);
        app.connect();
        let (_h1, _e1, _r1) = mount(&first, "one");
        let (_h2, _e2, _r2) = mount(&second, "two");

        first_bridge.play().unwrap();
        assert!(!first_bridge.state().paused);
        second_bridge.play().unwrap();
        assert!(first_bridge.state().paused);
        assert!(!second_bridge.state().paused);
    }
}
