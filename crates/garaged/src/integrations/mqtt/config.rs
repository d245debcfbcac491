use serde::Deserialize;

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "garaged".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_base_topic() -> String {
    "smart_garage".to_string()
}

/// Configuration for the MQTT integration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client ID
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Discovery prefix shared with Zigbee2MQTT and Home Assistant (default: "homeassistant")
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Prefix for the state and command topics of published doors
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Optional username for authentication
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str(r#"broker = "localhost""#).unwrap();
        assert_eq!(
            config,
            Config {
                broker: "localhost".to_string(),
                port: 1883,
                client_id: "garaged".to_string(),
                discovery_prefix: "homeassistant".to_string(),
                base_topic: "smart_garage".to_string(),
                username: None,
                password: None,
            }
        );
    }

    #[test]
    fn test_broker_is_required() {
        assert!(toml::from_str::<Config>("port = 1883").is_err());
    }
}
