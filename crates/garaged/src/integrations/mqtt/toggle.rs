use std::error::Error;

use super::availability::Availability;
use super::discovery::DeviceInfo;
use super::discovery::DiscoveryMessage;
use super::discovery::extract_value;
use crate::engine::Entity;
use crate::engine::Reading;
use crate::engine::ToggleDomain;

/// Switch or light entity that can drive a garage door relay
#[derive(Debug, Clone)]
pub struct ToggleEntity {
    /// Entity ID (e.g., "switch.garage_relay")
    pub id: String,

    pub domain: ToggleDomain,

    /// Human-readable name
    pub name: String,

    /// Unique identifier from Zigbee2MQTT
    #[allow(dead_code)]
    pub unique_id: String,

    /// Last on/off value seen on the state topic
    pub value: Option<bool>,

    /// Device information
    #[allow(dead_code)]
    pub device_info: Option<DeviceInfo>,

    /// Topic to receive state updates; optimistic entities have none
    pub state_topic: Option<String>,

    /// Topic to send commands
    pub command_topic: String,

    /// Payloads for on/off commands
    pub payload_on: String,
    pub payload_off: String,

    /// State values for on/off, defaulting to the command payloads
    state_on: String,
    state_off: String,

    value_template: Option<String>,

    /// JSON schema lights take `{"state": ...}` command payloads
    json_schema: bool,

    pub availability: Availability,
}

impl ToggleEntity {
    /// Create a ToggleEntity from a Zigbee2MQTT discovery message
    pub fn from_discovery(
        discovery: DiscoveryMessage,
        domain: ToggleDomain,
        id: String,
        node_id: String,
    ) -> Result<Self, Box<dyn Error>> {
        let availability = Availability::from_discovery(&discovery);

        let unique_id = discovery
            .unique_id
            .unwrap_or_else(|| format!("{}_{}", node_id, domain));

        let name = discovery
            .name
            .unwrap_or_else(|| format!("{} {}", domain, node_id));

        let command_topic = discovery
            .command_topic
            .ok_or("Missing command_topic in discovery message")?;

        let payload_on = discovery.payload_on.unwrap_or_else(|| "ON".to_string());
        let payload_off = discovery.payload_off.unwrap_or_else(|| "OFF".to_string());
        let json_schema = discovery.schema.as_deref() == Some("json");

        // JSON schema lights report {"state": "ON"} without a template
        let value_template = match discovery.value_template {
            Some(template) => Some(template),
            None if json_schema => Some("{{ value_json.state }}".to_string()),
            None => None,
        };

        Ok(Self {
            id,
            domain,
            name,
            unique_id,
            value: None,
            device_info: discovery.device,
            state_topic: discovery.state_topic,
            command_topic,
            state_on: discovery.state_on.unwrap_or_else(|| payload_on.clone()),
            state_off: discovery.state_off.unwrap_or_else(|| payload_off.clone()),
            payload_on,
            payload_off,
            value_template,
            json_schema,
            availability,
        })
    }

    /// Update the on/off value from an MQTT payload
    ///
    /// Zigbee2MQTT sends state updates as JSON, e.g.:
    /// {"state": "ON", "linkquality": 92}
    pub fn update_state(&mut self, payload: &[u8]) -> Result<(), Box<dyn Error>> {
        if let Err(e) = std::str::from_utf8(payload) {
            self.value = None;
            return Err(e.into());
        }

        let Some(value) = extract_value(payload, self.value_template.as_deref()) else {
            return Ok(());
        };

        self.value = if value == self.state_on {
            Some(true)
        } else if value == self.state_off {
            Some(false)
        } else {
            None
        };

        Ok(())
    }

    /// Generate the command payload that flips the entity
    ///
    /// JSON schema entities accept `TOGGLE` directly. Others are sent the
    /// opposite of their current value, or on when the value is unknown.
    pub fn toggle_payload(&self) -> Result<Vec<u8>, Box<dyn Error>> {
        if self.json_schema {
            return Ok(serde_json::to_vec(&serde_json::json!({ "state": "TOGGLE" }))?);
        }

        let payload = match self.value {
            Some(true) => &self.payload_off,
            Some(false) | None => &self.payload_on,
        };
        Ok(payload.as_bytes().to_vec())
    }
}

impl Entity for ToggleEntity {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn platform(&self) -> &'static str {
        match self.domain {
            ToggleDomain::Switch => "switch",
            ToggleDomain::Light => "light",
        }
    }

    fn reading(&self) -> Reading {
        match self.value {
            Some(on) if self.availability.is_available() => Reading::from(on),
            _ => Reading::Unavailable,
        }
    }
}
