//! Shared media state published through the `media-state` context.

use serde::{Deserialize, Serialize};

use super::BridgeError;
use super::manifest::{BridgedProperty, PropertyValue};
use crate::context::Context;

/// Snapshot of the mounted engine's playback state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaState {
    pub src: String,
    pub paused: bool,
    pub ended: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub autoplay: bool,
    /// Name of the engine publishing this state.
    pub engine: Option<String>,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            src: String::new(),
            paused: true,
            ended: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            playback_rate: 1.0,
            looping: false,
            autoplay: false,
            engine: None,
        }
    }
}

impl MediaState {
    pub fn get(&self, property: BridgedProperty) -> PropertyValue {
        match property {
            BridgedProperty::Src => PropertyValue::Text(self.src.clone()),
            BridgedProperty::Paused => PropertyValue::Bool(self.paused),
            BridgedProperty::Ended => PropertyValue::Bool(self.ended),
            BridgedProperty::CurrentTime => PropertyValue::Number(self.current_time),
            BridgedProperty::Duration => PropertyValue::Number(self.duration),
            BridgedProperty::Volume => PropertyValue::Number(self.volume),
            BridgedProperty::Muted => PropertyValue::Bool(self.muted),
            BridgedProperty::PlaybackRate => PropertyValue::Number(self.playback_rate),
            BridgedProperty::Loop => PropertyValue::Bool(self.looping),
            BridgedProperty::Autoplay => PropertyValue::Bool(self.autoplay),
        }
    }

    /// Validate and store `value`. Read-only properties are accepted here;
    /// the bridge rejects writes to them before they reach an engine.
    pub fn apply(&mut self, property: BridgedProperty, value: &PropertyValue) -> Result<(), BridgeError> {
        let mismatch = || BridgeError::TypeMismatch {
            property,
            expected: property.default_value().type_name(),
            found: value.type_name(),
        };
        match property {
            BridgedProperty::Src => {
                self.src = value.as_str().ok_or_else(mismatch)?.to_string();
            }
            BridgedProperty::Paused => self.paused = value.as_bool().ok_or_else(mismatch)?,
            BridgedProperty::Ended => self.ended = value.as_bool().ok_or_else(mismatch)?,
            BridgedProperty::Muted => self.muted = value.as_bool().ok_or_else(mismatch)?,
            BridgedProperty::Loop => self.looping = value.as_bool().ok_or_else(mismatch)?,
            BridgedProperty::Autoplay => self.autoplay = value.as_bool().ok_or_else(mismatch)?,
            BridgedProperty::CurrentTime => {
                self.current_time = in_range(property, value.as_f64().ok_or_else(mismatch)?, |t| {
                    t.is_finite() && t >= 0.0
                })?;
            }
            BridgedProperty::Duration => {
                self.duration = in_range(property, value.as_f64().ok_or_else(mismatch)?, |d| d >= 0.0)?;
            }
            BridgedProperty::Volume => {
                self.volume = in_range(property, value.as_f64().ok_or_else(mismatch)?, |v| {
                    (0.0..=1.0).contains(&v)
                })?;
            }
            BridgedProperty::PlaybackRate => {
                self.playback_rate = in_range(property, value.as_f64().ok_or_else(mismatch)?, |r| {
                    r.is_finite() && r > 0.0
                })?;
            }
        }
        Ok(())
    }
}

fn in_range(property: BridgedProperty, value: f64, valid: impl Fn(f64) -> bool) -> Result<f64, BridgeError> {
    if valid(value) {
        Ok(value)
    } else {
        Err(BridgeError::OutOfRange { property, value })
    }
}

thread_local! {
    static MEDIA_STATE: Context<MediaState> = Context::with_factory("media-state", MediaState::default);
}

/// The context the engine publishes its state through.
pub fn media_state() -> Context<MediaState> {
    MEDIA_STATE.with(Context::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_validates_ranges() {
        let mut state = MediaState::default();
        state.apply(BridgedProperty::Volume, &0.3.into()).unwrap();
        assert_eq!(state.volume, 0.3);
        assert_eq!(
            state.apply(BridgedProperty::Volume, &1.5.into()),
            Err(BridgeError::OutOfRange {
                property: BridgedProperty::Volume,
                value: 1.5
            })
        );
        assert!(state.apply(BridgedProperty::PlaybackRate, &0.0.into()).is_err());
        assert!(state.apply(BridgedProperty::CurrentTime, &(-1.0).into()).is_err());
        assert!(state.apply(BridgedProperty::CurrentTime, &f64::INFINITY.into()).is_err());
        assert!(state.apply(BridgedProperty::CurrentTime, &f64::NAN.into()).is_err());
        state.apply(BridgedProperty::CurrentTime, &12.5.into()).unwrap();
        assert_eq!(state.current_time, 12.5);
        assert_eq!(state.volume, 0.3);
    }

    #[test]
    fn apply_checks_types() {
        let mut state = MediaState::default();
        assert_eq!(
            state.apply(BridgedProperty::Muted, &"yes".into()),
            Err(BridgeError::TypeMismatch {
                property: BridgedProperty::Muted,
                expected: "boolean",
                found: "text"
            })
        );
        state.apply(BridgedProperty::Src, &"intro.mp4".into()).unwrap();
        assert_eq!(state.get(BridgedProperty::Src), PropertyValue::Text("intro.mp4".into()));
    }

    #[test]
    fn serializes_loop_under_its_manifest_name() {
        let json = serde_json::to_value(MediaState::default()).unwrap();
        assert_eq!(json["loop"], serde_json::json!(false));
        assert_eq!(json["paused"], serde_json::json!(true));
    }
}
