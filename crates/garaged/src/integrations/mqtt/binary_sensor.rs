use std::error::Error;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use super::availability::Availability;
use super::discovery::DeviceInfo;
use super::discovery::DiscoveryMessage;
use super::discovery::extract_value;
use crate::engine::Entity;
use crate::engine::Reading;

/// Device class for binary sensors, matching Home Assistant's binary_sensor device classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarySensorDeviceClass {
    Battery,
    BatteryCharging,
    CarbonMonoxide,
    Cold,
    Connectivity,
    Door,
    GarageDoor,
    Gas,
    Heat,
    Light,
    Lock,
    Moisture,
    Motion,
    Moving,
    Occupancy,
    Opening,
    Plug,
    Power,
    Presence,
    Problem,
    Running,
    Safety,
    Smoke,
    Sound,
    Tamper,
    Update,
    Vibration,
    Window,
    /// A device class not yet known to garaged
    Unknown(String),
}

impl fmt::Display for BinarySensorDeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(s) => write!(f, "{}", s),
            other => {
                // Use the snake_case serde name
                match serde_json::to_value(other) {
                    Ok(serde_json::Value::String(name)) => f.write_str(&name),
                    _ => write!(f, "{:?}", other),
                }
            }
        }
    }
}

impl From<String> for BinarySensorDeviceClass {
    fn from(s: String) -> Self {
        match s.as_str() {
            "battery" => Self::Battery,
            "battery_charging" => Self::BatteryCharging,
            "carbon_monoxide" => Self::CarbonMonoxide,
            "cold" => Self::Cold,
            "connectivity" => Self::Connectivity,
            "door" => Self::Door,
            "garage_door" => Self::GarageDoor,
            "gas" => Self::Gas,
            "heat" => Self::Heat,
            "light" => Self::Light,
            "lock" => Self::Lock,
            "moisture" => Self::Moisture,
            "motion" => Self::Motion,
            "moving" => Self::Moving,
            "occupancy" => Self::Occupancy,
            "opening" => Self::Opening,
            "plug" => Self::Plug,
            "power" => Self::Power,
            "presence" => Self::Presence,
            "problem" => Self::Problem,
            "running" => Self::Running,
            "safety" => Self::Safety,
            "smoke" => Self::Smoke,
            "sound" => Self::Sound,
            "tamper" => Self::Tamper,
            "update" => Self::Update,
            "vibration" => Self::Vibration,
            "window" => Self::Window,
            _ => Self::Unknown(s),
        }
    }
}

/// Binary sensor entity (e.g., a door contact or reed switch)
#[derive(Debug, Clone)]
pub struct BinarySensor {
    /// Entity ID (e.g., "binary_sensor.garage_open")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Unique identifier from Zigbee2MQTT
    #[allow(dead_code)]
    pub unique_id: String,

    /// Device class (e.g., Door, GarageDoor)
    pub device_class: Option<BinarySensorDeviceClass>,

    /// Last value decoded from the state topic; `None` until one arrives
    /// or when the payload matched neither on nor off
    pub value: Option<bool>,

    /// Device information
    #[allow(dead_code)]
    pub device_info: Option<DeviceInfo>,

    /// Topic to receive state updates
    pub state_topic: String,

    /// Value meaning on (default "ON")
    payload_on: String,

    /// Value meaning off (default "OFF")
    payload_off: String,

    /// Value template for extracting state from JSON payload
    /// e.g., "{{ value_json.contact }}" -> key is "contact"
    value_template: Option<String>,

    pub availability: Availability,
}

impl BinarySensor {
    /// Create a BinarySensor entity from a Zigbee2MQTT discovery message
    pub fn from_discovery(
        discovery: DiscoveryMessage,
        id: String,
        node_id: String,
    ) -> Result<Self, Box<dyn Error>> {
        let availability = Availability::from_discovery(&discovery);

        let unique_id = discovery
            .unique_id
            .unwrap_or_else(|| format!("{}_binary_sensor", node_id));

        let name = discovery
            .name
            .unwrap_or_else(|| format!("Binary Sensor {}", node_id));

        let state_topic = discovery
            .state_topic
            .ok_or("Missing state_topic in discovery message")?;

        let device_class = discovery.device_class.map(BinarySensorDeviceClass::from);

        Ok(Self {
            id,
            name,
            unique_id,
            device_class,
            value: None,
            device_info: discovery.device,
            state_topic,
            payload_on: discovery.payload_on.unwrap_or_else(|| "ON".to_string()),
            payload_off: discovery.payload_off.unwrap_or_else(|| "OFF".to_string()),
            value_template: discovery.value_template,
            availability,
        })
    }

    /// Update the binary sensor value from an MQTT payload
    ///
    /// Zigbee2MQTT sends state updates as JSON, e.g.:
    /// {"contact": false, "battery": 100, "linkquality": 120}
    ///
    /// Payloads without the templated key (another attribute of the same
    /// device) leave the value untouched.
    pub fn update_state(&mut self, payload: &[u8]) -> Result<(), Box<dyn Error>> {
        if let Err(e) = std::str::from_utf8(payload) {
            self.value = None;
            return Err(e.into());
        }

        let template = self
            .value_template
            .as_deref()
            .unwrap_or("{{ value_json.state }}");
        let value = match extract_value(payload, Some(template)) {
            Some(value) => value,
            // Not a JSON object: treat the raw payload as the value
            None if !matches!(
                serde_json::from_slice::<serde_json::Value>(payload),
                Ok(serde_json::Value::Object(_))
            ) =>
            {
                String::from_utf8_lossy(payload).trim().to_string()
            }
            None => return Ok(()),
        };

        self.value = if value == self.payload_on {
            Some(true)
        } else if value == self.payload_off {
            Some(false)
        } else {
            None
        };

        Ok(())
    }
}

impl Entity for BinarySensor {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn platform(&self) -> &'static str {
        "binary_sensor"
    }

    fn reading(&self) -> Reading {
        match self.value {
            Some(on) if self.availability.is_available() => Reading::from(on),
            _ => Reading::Unavailable,
        }
    }
}
