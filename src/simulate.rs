//! Scenario runner behind `playbind simulate`.
//!
//! A scenario is a JSON document describing a player: its runtime
//! config, initial attributes, and a list of steps (commands, engine
//! mounts, attribute edits, expectations). Running it builds a host tree
//! (app root providing the active registry, one player with a bridge and
//! a controls manager) and reports the events the player saw and the
//! final state.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bridge::{
    BridgeError, BridgedProperty, MEDIA_EVENTS, MediaBridge, MediaState, MemoryEngine, PropertyValue,
};
use crate::config::RuntimeConfig;
use crate::context::Provider;
use crate::controls::{ControlsManager, ControlsPanel};
use crate::discovery::{ActiveRegistry, Registration, active_registry};
use crate::host::{Host, HostError};

#[derive(Debug, thiserror::Error)]
pub enum SimulateError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("step {step}: {source}")]
    Bridge { step: usize, source: BridgeError },
    #[error("step {step}: {source}")]
    Host { step: usize, source: HostError },
    #[error("step {step}: unknown engine {engine:?}")]
    UnknownEngine { step: usize, engine: String },
    #[error("step {step}: no engine is mounted")]
    NothingMounted { step: usize },
    #[error("step {step}: expected {property} to be {expected}, found {actual}")]
    Expectation {
        step: usize,
        property: BridgedProperty,
        expected: PropertyValue,
        actual: PropertyValue,
    },
}

/// A scenario file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub config: RuntimeConfig,
    /// Attributes set on the player before it connects.
    pub attributes: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

fn default_engine() -> String {
    "memory".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Set {
        property: BridgedProperty,
        value: PropertyValue,
    },
    Play,
    Pause,
    MountEngine {
        #[serde(default = "default_engine")]
        engine: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Unmount the most recently mounted engine.
    UnmountEngine,
    SetAttribute {
        name: String,
        #[serde(default)]
        value: String,
    },
    RemoveAttribute {
        name: String,
    },
    MountControls {
        name: String,
    },
    ShowControls {
        visible: bool,
    },
    Expect {
        property: BridgedProperty,
        value: PropertyValue,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<PropertyValue>,
}

/// What `simulate` prints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub events: Vec<EventRecord>,
    pub state: MediaState,
    pub engine: Option<String>,
    pub pending: Vec<String>,
    pub controls: Vec<String>,
    pub controls_visible: bool,
}

pub fn load(path: &Path) -> Result<Scenario, SimulateError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SimulateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

struct MountedEngine {
    host: Host,
    _engine: Rc<MemoryEngine>,
    _registration: Registration,
}

struct Simulation {
    app: Host,
    player: Host,
    bridge: MediaBridge,
    controls: ControlsManager,
    engines: Vec<MountedEngine>,
    panels: Vec<(Host, Registration)>,
    events: Rc<RefCell<Vec<EventRecord>>>,
    _registry: Provider<ActiveRegistry>,
}

impl Simulation {
    fn new(scenario: &Scenario) -> Result<Self, SimulateError> {
        let app = Host::root("app", scenario.config.clone());
        let registry = active_registry().provide(&app);
        let player = Host::new("player");
        for (name, value) in &scenario.attributes {
            player
                .set_attribute(name, value.clone())
                .map_err(|source| SimulateError::Host { step: 0, source })?;
        }
        app.append_child(&player);
        let bridge = MediaBridge::attach(&player);
        let controls = ControlsManager::attach(&player);

        let events: Rc<RefCell<Vec<EventRecord>>> = Rc::default();
        for kind in MEDIA_EVENTS {
            let events = events.clone();
            player.add_event_listener(kind, move |event| {
                events.borrow_mut().push(EventRecord {
                    kind: event.kind().to_string(),
                    detail: event.detail().cloned(),
                });
            });
        }
        app.connect();

        Ok(Self {
            app,
            player,
            bridge,
            controls,
            engines: Vec::new(),
            panels: Vec::new(),
            events,
            _registry: registry,
        })
    }

    fn step(&mut self, step: usize, op: &Step) -> Result<(), SimulateError> {
        let bridge_err = |source| SimulateError::Bridge { step, source };
        let host_err = |source| SimulateError::Host { step, source };
        match op {
            Step::Set { property, value } => self.bridge.set(*property, value.clone()).map_err(bridge_err)?,
            Step::Play => self.bridge.play().map_err(bridge_err)?,
            Step::Pause => self.bridge.pause().map_err(bridge_err)?,
            Step::MountEngine { engine, name } => {
                if engine != "memory" {
                    return Err(SimulateError::UnknownEngine {
                        step,
                        engine: engine.clone(),
                    });
                }
                let name = name.clone().unwrap_or_else(|| format!("{engine}-{}", self.engines.len() + 1));
                let host = Host::new(format!("engine:{name}"));
                self.player.append_child(&host);
                let (engine, registration) = MemoryEngine::mount(&host, name);
                self.engines.push(MountedEngine {
                    host,
                    _engine: engine,
                    _registration: registration,
                });
            }
            Step::UnmountEngine => {
                let mounted = self.engines.pop().ok_or(SimulateError::NothingMounted { step })?;
                self.player.remove_child(&mounted.host);
            }
            Step::SetAttribute { name, value } => {
                self.player.set_attribute(name, value.clone()).map_err(host_err)?;
            }
            Step::RemoveAttribute { name } => {
                self.player.remove_attribute(name);
            }
            Step::MountControls { name } => {
                let host = Host::new(name.clone());
                self.player.append_child(&host);
                let registration = ControlsPanel::mount(&host);
                self.panels.push((host, registration));
            }
            Step::ShowControls { visible } => self.controls.set_visible(*visible),
            Step::Expect { property, value } => {
                let actual = self.bridge.get(*property);
                if actual != *value {
                    return Err(SimulateError::Expectation {
                        step,
                        property: *property,
                        expected: value.clone(),
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    fn report(&self) -> Report {
        Report {
            events: self.events.borrow().clone(),
            state: self.bridge.state(),
            engine: self.bridge.engine_name(),
            pending: self.bridge.pending_requests(),
            controls: self.controls.panels(),
            controls_visible: self.controls.is_visible(),
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.app.disconnect();
    }
}

/// Run every step of `scenario` in order. Steps are numbered from 1.
pub fn run(scenario: &Scenario) -> Result<Report, SimulateError> {
    let mut simulation = Simulation::new(scenario)?;
    for (index, op) in scenario.steps.iter().enumerate() {
        tracing::debug!(step = index + 1, ?op, "running step");
        simulation.step(index + 1, op)?;
    }
    let report = simulation.report();
    tracing::info!(
        steps = scenario.steps.len(),
        events = report.events.len(),
        engine = ?report.engine,
        "scenario finished"
    );
    Ok(report)
}
