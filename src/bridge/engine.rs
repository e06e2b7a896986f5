//! Media engines and the in-memory reference engine.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::BridgeError;
use super::manifest::{BridgedProperty, PropertyValue};
use super::state::MediaState;
use crate::context::Provider;
use crate::discovery::{Registration, SignalKind, register};
use crate::host::{AttributeChange, Event, Host, SubscriptionId, WeakHost};

/// A playback backend mounted inside a player.
///
/// Engines announce themselves with [`announce_engine`]; the nearest
/// player bridge picks them up and forwards commands to them.
pub trait MediaEngine {
    fn name(&self) -> &str;

    /// Start publishing into the player's shared state record.
    fn attach(&self, store: Provider<MediaState>);

    /// Stop publishing. Called when the engine is swapped out or unmounted.
    fn detach(&self);

    fn property(&self, property: BridgedProperty) -> PropertyValue;

    fn set_property(&self, property: BridgedProperty, value: PropertyValue) -> Result<(), BridgeError>;

    fn play(&self) -> Result<(), BridgeError>;

    fn pause(&self) -> Result<(), BridgeError>;
}

/// Discovery payload carried by an engine's registration.
pub struct EngineOffer {
    pub engine: Rc<dyn MediaEngine>,
}

impl fmt::Debug for EngineOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOffer")
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Offer `engine`, mounted on `host`, to the nearest player.
pub fn announce_engine(host: &Host, engine: Rc<dyn MediaEngine>) -> Registration {
    register(host, SignalKind::MediaProvider, Rc::new(EngineOffer { engine }))
}

/// Engine that keeps its state in memory and plays nothing.
///
/// It mirrors the attributes found on its own host (`src`, `muted`,
/// `loop`, `autoplay`, `volume`) into properties and emits the matching
/// bridged events on its host.
pub struct MemoryEngine {
    name: String,
    host: WeakHost,
    state: RefCell<MediaState>,
    store: RefCell<Option<Provider<MediaState>>>,
    log: RefCell<Vec<String>>,
    observer: SubscriptionId,
}

impl MemoryEngine {
    /// Create an engine on `host` and announce it.
    pub fn mount(host: &Host, name: impl Into<String>) -> (Rc<Self>, Registration) {
        let name = name.into();
        let engine = Rc::new_cyclic(|weak: &Weak<MemoryEngine>| {
            let engine = weak.clone();
            let observer = host.observe_attributes(move |change| {
                if let Some(engine) = engine.upgrade() {
                    engine.apply_attribute(change);
                }
            });
            MemoryEngine {
                state: RefCell::new(MediaState {
                    engine: Some(name.clone()),
                    ..MediaState::default()
                }),
                name,
                host: host.downgrade(),
                store: RefCell::new(None),
                log: RefCell::new(Vec::new()),
                observer,
            }
        });
        let registration = announce_engine(host, engine.clone());
        (engine, registration)
    }

    /// Operations applied so far, oldest first.
    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn snapshot(&self) -> MediaState {
        self.state.borrow().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.store.borrow().is_some()
    }

    fn record(&self, entry: String) {
        tracing::debug!(engine = %self.name, op = %entry, "engine op");
        self.log.borrow_mut().push(entry);
    }

    fn publish(&self) {
        let store = self.store.borrow().clone();
        if let Some(store) = store {
            let snapshot = self.snapshot();
            store.set(snapshot);
        }
    }

    fn emit(&self, kind: &str, detail: Option<PropertyValue>) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let event = match detail {
            Some(detail) => Event::with_detail(kind, detail),
            None => Event::new(kind),
        };
        host.emit(&Rc::new(event));
    }

    fn apply_attribute(&self, change: &AttributeChange) {
        let Some(property) = BridgedProperty::from_name(&change.name) else {
            return;
        };
        let value = match (property, change.value.as_deref()) {
            (BridgedProperty::Src, value) => PropertyValue::Text(value.unwrap_or_default().to_string()),
            (BridgedProperty::Muted | BridgedProperty::Loop | BridgedProperty::Autoplay, value) => {
                PropertyValue::Bool(value.is_some())
            }
            (BridgedProperty::Volume, Some(raw)) => match raw.trim().parse::<f64>() {
                Ok(volume) => PropertyValue::Number(volume),
                Err(_) => {
                    tracing::warn!(engine = %self.name, value = raw, "ignoring unparsable volume attribute");
                    return;
                }
            },
            (BridgedProperty::Volume, None) => BridgedProperty::Volume.default_value(),
            _ => return,
        };
        if let Err(e) = self.set_property(property, value) {
            tracing::warn!(engine = %self.name, attribute = %change.name, error = %e, "attribute rejected");
        }
    }
}

impl MediaEngine for MemoryEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, store: Provider<MediaState>) {
        *self.store.borrow_mut() = Some(store);
        self.record("attach".to_string());
        self.publish();
    }

    fn detach(&self) {
        self.store.borrow_mut().take();
        self.record("detach".to_string());
    }

    fn property(&self, property: BridgedProperty) -> PropertyValue {
        self.state.borrow().get(property)
    }

    fn set_property(&self, property: BridgedProperty, value: PropertyValue) -> Result<(), BridgeError> {
        if !property.is_writable() {
            return Err(BridgeError::ReadOnly(property));
        }
        let changed = {
            let mut state = self.state.borrow_mut();
            let before = state.get(property);
            state.apply(property, &value)?;
            if property == BridgedProperty::Src && before != value {
                state.current_time = 0.0;
                state.ended = false;
            }
            before != value
        };
        self.record(format!("set {property}={value}"));
        if !changed {
            return Ok(());
        }
        self.publish();
        if let Some(event) = property.change_event() {
            self.emit(event, Some(value));
        }
        if property == BridgedProperty::Src {
            self.emit("loadedmetadata", None);
        }
        Ok(())
    }

    fn play(&self) -> Result<(), BridgeError> {
        let started = {
            let mut state = self.state.borrow_mut();
            let started = state.paused;
            state.paused = false;
            state.ended = false;
            started
        };
        self.record("play".to_string());
        if started {
            self.publish();
            self.emit("play", None);
            self.emit("playing", None);
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), BridgeError> {
        let paused = {
            let mut state = self.state.borrow_mut();
            !std::mem::replace(&mut state.paused, true)
        };
        self.record("pause".to_string());
        if paused {
            self.publish();
            self.emit("pause", None);
        }
        Ok(())
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        if let Some(host) = self.host.upgrade() {
            host.unobserve_attributes(self.observer);
        }
    }
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}
