//! Entity availability from MQTT availability topics.

use super::discovery::AvailabilityTopic;
use super::discovery::DiscoveryMessage;
use super::discovery::extract_value;

const DEFAULT_PAYLOAD_AVAILABLE: &str = "online";
const DEFAULT_PAYLOAD_NOT_AVAILABLE: &str = "offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityMode {
    /// Available only while every topic reports available
    All,
    /// Available while at least one topic reports available
    Any,
    /// The most recent message on any topic decides
    Latest,
}

#[derive(Debug, Clone)]
struct Source {
    topic: String,
    payload_available: String,
    payload_not_available: String,
    value_template: Option<String>,
    /// `None` until the first message arrives
    available: Option<bool>,
}

/// Tracks the availability topics of one entity.
///
/// An entity without availability topics is always available. With topics,
/// it stays unavailable until a topic reports available.
#[derive(Debug, Clone)]
pub struct Availability {
    mode: AvailabilityMode,
    sources: Vec<Source>,
    latest: Option<bool>,
}

impl Availability {
    pub fn from_discovery(discovery: &DiscoveryMessage) -> Self {
        let mut sources = Vec::new();

        if let Some(topic) = &discovery.availability_topic {
            sources.push(Source::new(
                &AvailabilityTopic {
                    topic: topic.clone(),
                    payload_available: discovery.payload_available.clone(),
                    payload_not_available: discovery.payload_not_available.clone(),
                    value_template: None,
                },
            ));
        }
        for entry in discovery.availability.iter().flatten() {
            sources.push(Source::new(entry));
        }

        let mode = match discovery.availability_mode.as_deref() {
            Some("all") => AvailabilityMode::All,
            Some("any") => AvailabilityMode::Any,
            _ => AvailabilityMode::Latest,
        };

        Self {
            mode,
            sources,
            latest: None,
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.topic.as_str())
    }

    /// Apply a message received on `topic`. Returns true when the topic is
    /// one of ours.
    pub fn update(&mut self, topic: &str, payload: &[u8]) -> bool {
        let mut matched = false;
        for source in self.sources.iter_mut().filter(|s| s.topic == topic) {
            matched = true;
            let Some(value) = extract_value(payload, source.value_template.as_deref()) else {
                continue;
            };
            // Zigbee2MQTT's JSON availability payloads carry the value under
            // "state" even when no template was advertised.
            let value = if source.value_template.is_none() {
                extract_value(payload, Some("{{ value_json.state }}")).unwrap_or(value)
            } else {
                value
            };
            let available = if value == source.payload_available {
                Some(true)
            } else if value == source.payload_not_available {
                Some(false)
            } else {
                None
            };
            if let Some(available) = available {
                source.available = Some(available);
                self.latest = Some(available);
            }
        }
        matched
    }

    pub fn is_available(&self) -> bool {
        if self.sources.is_empty() {
            return true;
        }
        match self.mode {
            AvailabilityMode::All => self.sources.iter().all(|s| s.available == Some(true)),
            AvailabilityMode::Any => self.sources.iter().any(|s| s.available == Some(true)),
            AvailabilityMode::Latest => self.latest == Some(true),
        }
    }
}

impl Source {
    fn new(entry: &AvailabilityTopic) -> Self {
        Self {
            topic: entry.topic.clone(),
            payload_available: entry
                .payload_available
                .clone()
                .unwrap_or_else(|| DEFAULT_PAYLOAD_AVAILABLE.to_string()),
            payload_not_available: entry
                .payload_not_available
                .clone()
                .unwrap_or_else(|| DEFAULT_PAYLOAD_NOT_AVAILABLE.to_string()),
            value_template: entry.value_template.clone(),
            available: None,
        }
    }
}
