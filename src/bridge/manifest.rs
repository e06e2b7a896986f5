//! The bridged surface: properties, methods and event names that the
//! player forwards to whichever engine is mounted.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::state::MediaState;

/// A dynamically typed bridged value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Bool(_) => "boolean",
            PropertyValue::Number(_) => "number",
            PropertyValue::Text(_) => "text",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Number(n) => write!(f, "{n}"),
            PropertyValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

/// Properties forwarded between the player and its engine, in manifest order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgedProperty {
    Src,
    Paused,
    Ended,
    CurrentTime,
    Duration,
    Volume,
    Muted,
    PlaybackRate,
    Loop,
    Autoplay,
}

impl BridgedProperty {
    pub const ALL: [BridgedProperty; 10] = [
        BridgedProperty::Src,
        BridgedProperty::Paused,
        BridgedProperty::Ended,
        BridgedProperty::CurrentTime,
        BridgedProperty::Duration,
        BridgedProperty::Volume,
        BridgedProperty::Muted,
        BridgedProperty::PlaybackRate,
        BridgedProperty::Loop,
        BridgedProperty::Autoplay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BridgedProperty::Src => "src",
            BridgedProperty::Paused => "paused",
            BridgedProperty::Ended => "ended",
            BridgedProperty::CurrentTime => "current_time",
            BridgedProperty::Duration => "duration",
            BridgedProperty::Volume => "volume",
            BridgedProperty::Muted => "muted",
            BridgedProperty::PlaybackRate => "playback_rate",
            BridgedProperty::Loop => "loop",
            BridgedProperty::Autoplay => "autoplay",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Value reported while no engine is connected.
    pub fn default_value(self) -> PropertyValue {
        MediaState::default().get(self)
    }

    /// Playback status is driven by `play`/`pause` and the engine itself.
    pub fn is_writable(self) -> bool {
        !matches!(
            self,
            BridgedProperty::Paused | BridgedProperty::Ended | BridgedProperty::Duration
        )
    }

    /// Event an engine emits when this property changes.
    pub fn change_event(self) -> Option<&'static str> {
        match self {
            BridgedProperty::Src => Some("sourcechange"),
            BridgedProperty::CurrentTime => Some("timeupdate"),
            BridgedProperty::Duration => Some("durationchange"),
            BridgedProperty::Volume | BridgedProperty::Muted => Some("volumechange"),
            BridgedProperty::PlaybackRate => Some("ratechange"),
            BridgedProperty::Ended => Some("ended"),
            BridgedProperty::Paused | BridgedProperty::Loop | BridgedProperty::Autoplay => None,
        }
    }
}

impl fmt::Display for BridgedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Methods forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgedMethod {
    Play,
    Pause,
}

impl BridgedMethod {
    pub const ALL: [BridgedMethod; 2] = [BridgedMethod::Play, BridgedMethod::Pause];

    pub fn name(self) -> &'static str {
        match self {
            BridgedMethod::Play => "play",
            BridgedMethod::Pause => "pause",
        }
    }
}

/// Engine events re-dispatched on the player host.
pub const MEDIA_EVENTS: [&str; 11] = [
    "play",
    "pause",
    "playing",
    "ended",
    "timeupdate",
    "durationchange",
    "volumechange",
    "ratechange",
    "loadedmetadata",
    "sourcechange",
    "error",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyEntry {
    pub name: &'static str,
    pub default: PropertyValue,
    pub writable: bool,
}

/// The full bridged surface, as printed by `playbind manifest`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub properties: Vec<PropertyEntry>,
    pub methods: Vec<&'static str>,
    pub events: Vec<&'static str>,
}

pub fn manifest() -> Manifest {
    Manifest {
        properties: BridgedProperty::ALL
            .into_iter()
            .map(|p| PropertyEntry {
                name: p.name(),
                default: p.default_value(),
                writable: p.is_writable(),
            })
            .collect(),
        methods: BridgedMethod::ALL.into_iter().map(BridgedMethod::name).collect(),
        events: MEDIA_EVENTS.to_vec(),
    }
}
