use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// Tri-state reading of a binary entity (door sensor or toggle relay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Reading {
    On,
    Off,
    /// The entity exists but reports no usable value (offline, unknown, removed).
    #[default]
    Unavailable,
}

impl From<bool> for Reading {
    fn from(on: bool) -> Self {
        if on { Reading::On } else { Reading::Off }
    }
}

impl Reading {
    /// `Some(true)` for on, `Some(false)` for off, `None` when unavailable.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Reading::On => Some(true),
            Reading::Off => Some(false),
            Reading::Unavailable => None,
        }
    }
}

/// Logical state of a garage door, derived from its two sensors and the
/// time since the last toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DoorState {
    Open,
    Closed,
    Opening,
    Unavailable,
}

/// State presented by the cover entity. There is no `closing`: a single
/// toggle relay cannot tell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CoverState {
    Open,
    Closed,
    Opening,
    Unavailable,
}

impl From<DoorState> for CoverState {
    fn from(state: DoorState) -> Self {
        match state {
            DoorState::Open => CoverState::Open,
            DoorState::Closed => CoverState::Closed,
            DoorState::Opening => CoverState::Opening,
            DoorState::Unavailable => CoverState::Unavailable,
        }
    }
}

/// Commands accepted by a garage door cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CoverCommand {
    Open,
    Close,
    Stop,
}

/// Entity domains that can drive a garage door relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToggleDomain {
    Switch,
    Light,
}

impl ToggleDomain {
    /// Resolve the domain from an entity id such as `switch.garage_relay`.
    ///
    /// Returns `None` for any domain that has no toggle capability we know of.
    pub fn from_entity_id(entity_id: &str) -> Option<Self> {
        let (domain, _) = entity_id.split_once('.')?;
        domain.parse().ok()
    }

    /// Name of the toggle service in this domain, e.g. `switch.toggle`.
    pub fn service(self) -> &'static str {
        match self {
            ToggleDomain::Switch => "switch.toggle",
            ToggleDomain::Light => "light.toggle",
        }
    }
}

/// Identifier of a configured garage door, derived from its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoorId(String);

impl DoorId {
    /// `"Main Garage"` becomes `main_garage`. Anything outside `[a-z0-9_]`
    /// maps to `_` so the id is always usable in MQTT topics.
    pub fn from_name(name: &str) -> Self {
        Self(
            name.trim()
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_lowercase()
                    } else {
                        '_'
                    }
                })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Entity id of the published state sensor.
    pub fn sensor_entity_id(&self) -> String {
        format!("sensor.smart_garage_{}_state", self.0)
    }

    /// Entity id of the published cover.
    pub fn cover_entity_id(&self) -> String {
        format!("cover.smart_garage_{}", self.0)
    }
}

impl fmt::Display for DoorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static description of a door handed to integrations when it is set up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoorInfo {
    pub id: DoorId,
    pub name: String,
    pub attributes: DoorAttributes,
}

/// Published view of one door: its state sensor and its cover.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoorSnapshot {
    pub id: DoorId,
    pub name: String,
    pub sensor_entity_id: String,
    pub cover_entity_id: String,
    pub state: DoorState,
    /// False only when the door could not be set up (missing entities).
    pub available: bool,
    pub cover: CoverSnapshot,
    pub attributes: DoorAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverSnapshot {
    pub state: CoverState,
    pub available: bool,
    pub is_closed: Option<bool>,
    pub is_opening: bool,
    pub icon: &'static str,
}

/// Extra attributes published alongside the sensor state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoorAttributes {
    pub open_sensor: String,
    pub closed_sensor: String,
    pub toggle_entity: String,
    pub opening_duration: u64,
}

/// Centralized snapshot of every configured door.
///
/// Readers load the whole snapshot; the engine swaps in a new one on every
/// publication.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub doors: BTreeMap<DoorId, DoorSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_door_id_from_name() {
        let id = DoorId::from_name("Main Garage");
        assert_eq!(id.as_str(), "main_garage");
        assert_eq!(id.sensor_entity_id(), "sensor.smart_garage_main_garage_state");
        assert_eq!(id.cover_entity_id(), "cover.smart_garage_main_garage");
    }

    #[test]
    fn test_door_id_has_no_topic_wildcards() {
        assert_eq!(DoorId::from_name("Garage #1").as_str(), "garage__1");
        assert_eq!(DoorId::from_name("Shed/Back+").as_str(), "shed_back_");
        assert_eq!(DoorId::from_name(" main_garage ").as_str(), "main_garage");
    }

    #[test]
    fn test_toggle_domain_from_entity_id() {
        assert_eq!(
            ToggleDomain::from_entity_id("switch.garage_relay"),
            Some(ToggleDomain::Switch)
        );
        assert_eq!(
            ToggleDomain::from_entity_id("light.garage_relay"),
            Some(ToggleDomain::Light)
        );
        assert_eq!(ToggleDomain::from_entity_id("input_boolean.relay"), None);
        assert_eq!(ToggleDomain::from_entity_id("switch"), None);
        assert_eq!(ToggleDomain::Light.service(), "light.toggle");
    }

    #[test]
    fn test_state_strings() {
        assert_eq!(DoorState::Opening.to_string(), "opening");
        assert_eq!(Reading::Unavailable.to_string(), "unavailable");
        assert_eq!("STOP".parse::<CoverCommand>().unwrap(), CoverCommand::Stop);
        assert_eq!(
            serde_json::to_value(CoverState::Closed).unwrap(),
            serde_json::json!("closed")
        );
    }
}
