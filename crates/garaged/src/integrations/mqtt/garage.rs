//! MQTT exposure of garage doors.
//!
//! Each door is announced through Home Assistant MQTT discovery as a state
//! sensor and a cover. Both configs are retained, as are the state topics, so
//! subscribers that connect later see the current value.

use serde_json::json;

use crate::engine::COVER_DEVICE_CLASS;
use crate::engine::COVER_FEATURES;
use crate::engine::CoverState;
use crate::engine::DoorId;
use crate::engine::DoorInfo;
use crate::engine::DoorSnapshot;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

const MANUFACTURER: &str = "Smart Garage";

/// Retained online/offline status of this process
pub fn availability_topic(base_topic: &str) -> String {
    format!("{}/status", base_topic)
}

/// Wildcard subscription matching every door's command topic
pub fn command_subscription(base_topic: &str) -> String {
    format!("{}/+/set", base_topic)
}

/// Extract the door id from a command topic `{base_topic}/{door_id}/set`.
pub fn parse_command_topic(topic: &str, base_topic: &str) -> Option<DoorId> {
    let door_id = topic
        .strip_prefix(base_topic)?
        .strip_prefix('/')?
        .strip_suffix("/set")?;
    if door_id.is_empty() || door_id.contains('/') {
        return None;
    }
    Some(DoorId::from_name(door_id))
}

/// A single MQTT publication
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Publish {
    fn retained(topic: String, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retain: true,
        }
    }
}

/// Topic layout of one door
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarageTopics {
    pub sensor_config: String,
    pub cover_config: String,
    pub state: String,
    pub attributes: String,
    pub availability: String,
    pub cover_state: String,
    pub cover_availability: String,
    pub command: String,
    pub status: String,
}

impl GarageTopics {
    pub fn new(door_id: &DoorId, discovery_prefix: &str, base_topic: &str) -> Self {
        let node = format!("smart_garage_{}", door_id);
        let door_base = format!("{}/{}", base_topic, door_id);
        Self {
            sensor_config: format!("{}/sensor/{}/state/config", discovery_prefix, node),
            cover_config: format!("{}/cover/{}/cover/config", discovery_prefix, node),
            state: format!("{}/state", door_base),
            attributes: format!("{}/attributes", door_base),
            availability: format!("{}/availability", door_base),
            cover_state: format!("{}/cover", door_base),
            cover_availability: format!("{}/cover/availability", door_base),
            command: format!("{}/set", door_base),
            status: availability_topic(base_topic),
        }
    }

    /// Retained discovery configs announcing the sensor and the cover
    pub fn discovery(&self, door: &DoorInfo) -> Vec<Publish> {
        let id = &door.id;
        let sensor = json!({
            "name": format!("{} State", door.name),
            "unique_id": format!("smart_garage_{}_state", id),
            "object_id": format!("smart_garage_{}_state", id),
            "state_topic": self.state,
            "json_attributes_topic": self.attributes,
            "icon": "mdi:garage",
            "availability": [
                { "topic": self.status },
                { "topic": self.availability },
            ],
            "availability_mode": "all",
            "device": {
                "identifiers": [format!("smart_garage_{}_state", id)],
                "name": door.name,
                "manufacturer": MANUFACTURER,
                "model": "Garage Door Sensor",
            },
        });
        let mut cover = json!({
            "name": door.name,
            "unique_id": format!("smart_garage_{}_cover", id),
            "object_id": format!("smart_garage_{}", id),
            "device_class": COVER_DEVICE_CLASS,
            "command_topic": self.command,
            "state_topic": self.cover_state,
            "state_open": "open",
            "state_closed": "closed",
            "state_opening": "opening",
            "json_attributes_topic": self.attributes,
            "availability": [
                { "topic": self.status },
                { "topic": self.cover_availability },
            ],
            "availability_mode": "all",
            "device": {
                "identifiers": [format!("smart_garage_{}_cover", id)],
                "name": door.name,
                "manufacturer": MANUFACTURER,
                "model": "Garage Door Cover",
            },
        });
        if let Some(fields) = cover.as_object_mut() {
            for command in COVER_FEATURES {
                fields.insert(
                    format!("payload_{}", command),
                    command.to_string().to_uppercase().into(),
                );
            }
        }

        vec![
            Publish::retained(self.sensor_config.clone(), sensor.to_string()),
            Publish::retained(self.cover_config.clone(), cover.to_string()),
        ]
    }

    /// Retained state, attributes and availability for a door snapshot
    pub fn state(&self, door: &DoorSnapshot) -> Vec<Publish> {
        let online = |available: bool| if available { PAYLOAD_ONLINE } else { PAYLOAD_OFFLINE };
        let attributes = json!({
            "open_sensor": door.attributes.open_sensor,
            "closed_sensor": door.attributes.closed_sensor,
            "toggle_entity": door.attributes.toggle_entity,
            "opening_duration": door.attributes.opening_duration,
        });

        let mut publishes = vec![
            Publish::retained(self.state.clone(), door.state.to_string()),
            Publish::retained(self.attributes.clone(), attributes.to_string()),
            Publish::retained(self.availability.clone(), online(door.available)),
            Publish::retained(self.cover_availability.clone(), online(door.cover.available)),
        ];
        // Covers have no "unavailable" state; availability carries it
        if door.cover.state != CoverState::Unavailable {
            publishes.push(Publish::retained(
                self.cover_state.clone(),
                door.cover.state.to_string(),
            ));
        }
        publishes
    }

    /// Clear the retained discovery configs and mark the door offline
    pub fn removal(&self) -> Vec<Publish> {
        vec![
            Publish::retained(self.sensor_config.clone(), Vec::new()),
            Publish::retained(self.cover_config.clone(), Vec::new()),
            Publish::retained(self.availability.clone(), PAYLOAD_OFFLINE),
            Publish::retained(self.cover_availability.clone(), PAYLOAD_OFFLINE),
        ]
    }
}
