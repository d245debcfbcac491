use serde::Deserialize;
use serde::Serialize;

/// Deserialize a field that can be either a string or an integer.
///
/// Zigbee2MQTT sends version fields like `hw_version` as integers, but the
/// Home Assistant discovery schema defines them as strings. This helper
/// accepts both types and converts integers to strings.
fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrInt;

    impl<'de> de::Visitor<'de> for StringOrInt {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string, integer, or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_any(StringOrInt)
}

/// Deserialize a field that can be a string, boolean, or integer.
///
/// Zigbee2MQTT sends `payload_on`/`payload_off` as `"ON"`/`"OFF"` for lights
/// but `true`/`false` for binary sensors. This helper accepts any scalar type
/// and converts to a string.
fn deserialize_string_or_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrScalar;

    impl<'de> de::Visitor<'de> for StringOrScalar {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string, boolean, integer, or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_any(StringOrScalar)
}

/// Discovery message for Zigbee2MQTT devices
///
/// This struct represents the JSON payload sent by Zigbee2MQTT on discovery topics.
/// Based on Home Assistant's MQTT discovery protocol.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryMessage {
    /// Human-readable name of the entity
    pub name: Option<String>,

    /// Unique identifier for this entity
    pub unique_id: Option<String>,

    /// Suggested object id; becomes the entity id as `{component}.{object_id}`
    pub object_id: Option<String>,

    /// Topic to receive state updates
    pub state_topic: Option<String>,

    /// Topic to send commands
    pub command_topic: Option<String>,

    /// Device information
    pub device: Option<DeviceInfo>,

    /// Payload to send when turning on
    #[serde(default, deserialize_with = "deserialize_string_or_scalar")]
    pub payload_on: Option<String>,

    /// Payload to send when turning off
    #[serde(default, deserialize_with = "deserialize_string_or_scalar")]
    pub payload_off: Option<String>,

    /// State value meaning on, when it differs from `payload_on`
    #[serde(default, deserialize_with = "deserialize_string_or_scalar")]
    pub state_on: Option<String>,

    /// State value meaning off, when it differs from `payload_off`
    #[serde(default, deserialize_with = "deserialize_string_or_scalar")]
    pub state_off: Option<String>,

    /// Schema type (default is "default"; Zigbee2MQTT lights use "json")
    pub schema: Option<String>,

    /// Device class (e.g., "door", "garage_door", "window") for binary sensors
    pub device_class: Option<String>,

    /// Value template for extracting state from JSON payload
    /// e.g., "{{ value_json.contact }}"
    pub value_template: Option<String>,

    /// Single availability topic (legacy form)
    pub availability_topic: Option<String>,

    /// Availability topics (list form, used by Zigbee2MQTT)
    pub availability: Option<Vec<AvailabilityTopic>>,

    /// How multiple availability topics combine: "all", "any" or "latest"
    pub availability_mode: Option<String>,

    /// Payload meaning available for `availability_topic`
    pub payload_available: Option<String>,

    /// Payload meaning not available for `availability_topic`
    pub payload_not_available: Option<String>,
}

/// One entry of the `availability` list in a discovery payload
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AvailabilityTopic {
    pub topic: String,
    pub payload_available: Option<String>,
    pub payload_not_available: Option<String>,
    /// e.g. "{{ value_json.state }}" for Zigbee2MQTT's JSON availability
    pub value_template: Option<String>,
}

/// Device information from Zigbee2MQTT discovery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceInfo {
    /// List of identifiers for this device
    pub identifiers: Vec<String>,

    /// Device name
    pub name: String,

    /// Manufacturer name
    pub manufacturer: Option<String>,

    /// Model name
    pub model: Option<String>,

    /// Software version (can be string or integer in Zigbee2MQTT)
    #[serde(default, deserialize_with = "deserialize_string_or_int")]
    pub sw_version: Option<String>,

    /// Hardware version (can be string or integer in Zigbee2MQTT)
    #[serde(default, deserialize_with = "deserialize_string_or_int")]
    pub hw_version: Option<String>,
}

/// Parse a discovery topic to extract component type, node_id, and object_id
///
/// Topic format: {prefix}/{component}/{node_id}/{object_id}/config
/// Example: homeassistant/light/0x00124b001234abcd/light/config
///
/// Returns: (component, node_id, object_id)
pub fn parse_discovery_topic(topic: &str, prefix: &str) -> Option<(String, String, String)> {
    // Remove the discovery prefix
    let without_prefix = topic.strip_prefix(prefix)?.strip_prefix('/')?;

    // Split the remaining parts
    let parts: Vec<&str> = without_prefix.split('/').collect();

    // We expect at least 4 parts: component/node_id/object_id/config
    if parts.len() < 4 || parts.last() != Some(&"config") {
        return None;
    }

    let component = parts[0].to_string();
    let node_id = parts[1].to_string();
    let object_id = parts[2].to_string();

    Some((component, node_id, object_id))
}

/// Derive the entity id for a discovered entity.
///
/// The payload's `object_id` wins. Otherwise the id is built from the topic:
/// `{component}.{node_id}` when the object id only repeats the component
/// (e.g. `light/0x00124b/light/config`), else `{component}.{node_id}_{object_id}`.
pub fn entity_id_for(
    component: &str,
    node_id: &str,
    object_id: &str,
    discovery: &DiscoveryMessage,
) -> String {
    if let Some(suggested) = &discovery.object_id {
        return format!("{}.{}", component, slugify(suggested));
    }
    if object_id == component {
        format!("{}.{}", component, slugify(node_id))
    } else {
        format!("{}.{}_{}", component, slugify(node_id), slugify(object_id))
    }
}

/// Lowercase and replace anything outside `[a-z0-9_]` with underscores.
fn slugify(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Extract the JSON key name from a Zigbee2MQTT value template.
///
/// Parses templates like `{{ value_json.occupancy }}` and returns `"occupancy"`.
/// Returns `None` if the template doesn't match the expected format.
pub fn parse_value_template_key(template: &str) -> Option<&str> {
    let inner = template
        .trim()
        .strip_prefix("{{")?
        .strip_suffix("}}")?
        .trim();
    inner.strip_prefix("value_json.")
}

/// Extract the value a template refers to from a payload.
///
/// With a `value_json.key` template the payload is parsed as JSON and the key
/// is read; scalars are rendered to strings. Without a template the raw
/// payload is used. Returns `None` when the value cannot be found.
pub fn extract_value(payload: &[u8], template: Option<&str>) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    let Some(key) = template.and_then(parse_value_template_key) else {
        return Some(text.to_string());
    };
    let json: serde_json::Value = serde_json::from_str(text).ok()?;
    match json.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_discovery_topic() {
        let topic = "homeassistant/light/0x00124b001234abcd/light/config";
        let result = parse_discovery_topic(topic, "homeassistant");
        assert_eq!(
            result,
            Some((
                "light".to_string(),
                "0x00124b001234abcd".to_string(),
                "light".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_discovery_topic_invalid() {
        let topic = "homeassistant/light/0x00124b001234abcd";
        let result = parse_discovery_topic(topic, "homeassistant");
        assert_eq!(result, None);
    }

    #[test]
    fn test_parse_binary_sensor_discovery_topic() {
        let topic = "homeassistant/binary_sensor/0x00124b001234abcd/occupancy/config";
        let result = parse_discovery_topic(topic, "homeassistant");
        assert_eq!(
            result,
            Some((
                "binary_sensor".to_string(),
                "0x00124b001234abcd".to_string(),
                "occupancy".to_string()
            ))
        );
    }

    #[test]
    fn test_entity_id_for() {
        let plain = DiscoveryMessage::default();
        assert_eq!(
            entity_id_for("light", "0x00124b001234abcd", "light", &plain),
            "light.0x00124b001234abcd"
        );
        assert_eq!(
            entity_id_for("binary_sensor", "0x00124b001234abcd", "contact", &plain),
            "binary_sensor.0x00124b001234abcd_contact"
        );

        let named = DiscoveryMessage {
            object_id: Some("Garage Open".to_string()),
            ..Default::default()
        };
        assert_eq!(
            entity_id_for("binary_sensor", "0x00124b001234abcd", "contact", &named),
            "binary_sensor.garage_open"
        );
    }

    #[test]
    fn test_parse_value_template_key() {
        assert_eq!(
            parse_value_template_key("{{ value_json.occupancy }}"),
            Some("occupancy")
        );
        assert_eq!(
            parse_value_template_key("{{value_json.contact}}"),
            Some("contact")
        );
        assert_eq!(parse_value_template_key("invalid"), None);
        assert_eq!(parse_value_template_key("{{ something_else }}"), None);
    }

    #[test]
    fn test_extract_value() {
        let template = Some("{{ value_json.contact }}");
        assert_eq!(
            extract_value(br#"{"contact": false, "battery": 97}"#, template),
            Some("false".to_string())
        );
        assert_eq!(extract_value(br#"{"battery": 97}"#, template), None);
        assert_eq!(extract_value(b"not json", template), None);
        assert_eq!(extract_value(b" online ", None), Some("online".to_string()));
    }

    #[test]
    fn test_deserialize_zigbee2mqtt_contact_sensor() {
        let payload = br#"{
            "availability": [{"topic": "zigbee2mqtt/bridge/state", "value_template": "{{ value_json.state }}"}],
            "availability_mode": "all",
            "device": {"identifiers": ["zigbee2mqtt_0x00124b001234abcd"], "name": "garage_open", "sw_version": 4},
            "device_class": "door",
            "name": null,
            "object_id": "garage_open",
            "payload_off": true,
            "payload_on": false,
            "state_topic": "zigbee2mqtt/garage_open",
            "unique_id": "0x00124b001234abcd_contact_zigbee2mqtt",
            "value_template": "{{ value_json.contact }}"
        }"#;

        let discovery: DiscoveryMessage = serde_json::from_slice(payload).unwrap();
        assert_eq!(discovery.payload_on.as_deref(), Some("false"));
        assert_eq!(discovery.payload_off.as_deref(), Some("true"));
        assert_eq!(discovery.availability_mode.as_deref(), Some("all"));
        let availability = discovery.availability.unwrap();
        assert_eq!(availability[0].topic, "zigbee2mqtt/bridge/state");
        assert_eq!(
            discovery.device.and_then(|d| d.sw_version).as_deref(),
            Some("4")
        );
    }
}
