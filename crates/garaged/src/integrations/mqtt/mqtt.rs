use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::MqttConfig;
use super::binary_sensor::BinarySensor;
use super::client::MqttClient;
use super::client::MqttMessage;
use super::discovery::DiscoveryMessage;
use super::discovery::entity_id_for;
use super::discovery::parse_discovery_topic;
use super::garage;
use super::garage::GarageTopics;
use super::garage::Publish;
use super::toggle::ToggleEntity;
use crate::engine::CoverCommand;
use crate::engine::DoorId;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::Reading;
use crate::engine::ToIntegrationMessage;
use crate::engine::ToggleDomain;

/// Components whose discovery topics we subscribe to
const DISCOVERY_COMPONENTS: [&str; 3] = ["binary_sensor", "switch", "light"];

/// Type alias for the shared binary sensors map
type BinarySensorsMap = Arc<Mutex<HashMap<String, Arc<Mutex<BinarySensor>>>>>;

/// Type alias for the shared switch and light map
type TogglesMap = Arc<Mutex<HashMap<String, Arc<Mutex<ToggleEntity>>>>>;

/// Discovery config topic to the entity id it announced, so an empty config
/// payload can be mapped back to the removed entity
type DiscoveryTopicsMap = Arc<Mutex<HashMap<String, String>>>;

fn invalid_data(message: impl Into<String>) -> Box<dyn Error + Send> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.into(),
    ))
}

/// Entities discovered over MQTT, shared with the background task
#[derive(Clone, Default)]
struct Entities {
    binary_sensors: BinarySensorsMap,
    toggles: TogglesMap,
    discovery_topics: DiscoveryTopicsMap,
}

impl Entities {
    /// Every topic some entity still needs: state topics plus availability
    /// topics.
    async fn topics_in_use(&self) -> Vec<String> {
        let mut topics = Vec::new();
        for sensor in self.binary_sensors.lock().await.values() {
            let sensor = sensor.lock().await;
            topics.push(sensor.state_topic.clone());
            topics.extend(sensor.availability.topics().map(str::to_string));
        }
        for toggle in self.toggles.lock().await.values() {
            let toggle = toggle.lock().await;
            topics.extend(toggle.state_topic.clone());
            topics.extend(toggle.availability.topics().map(str::to_string));
        }
        topics
    }
}

/// MQTT Integration for garaged
///
/// Discovers door sensors and relays announced by Zigbee2MQTT (or any other
/// Home Assistant discovery publisher), and exposes every configured door as
/// a sensor and a cover through the same discovery protocol.
pub struct MqttIntegration<C: MqttClient> {
    client: Arc<Mutex<C>>,
    config: MqttConfig,
    entities: Entities,
    /// Published doors and their topic layout
    doors: HashMap<DoorId, GarageTopics>,
    to_engine: Option<FromIntegrationSender>,
    /// Handle to the background message processing task
    message_task: Option<JoinHandle<()>>,
}

impl<C: MqttClient> MqttIntegration<C> {
    /// Create a new MQTT integration
    pub fn new(client: C, config: &MqttConfig) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            config: config.clone(),
            entities: Entities::default(),
            doors: HashMap::new(),
            to_engine: None,
            message_task: None,
        }
    }

    /// Process incoming MQTT messages in a background task
    ///
    /// This is spawned as a separate tokio task in setup() so that
    /// handle_message() can publish concurrently.
    async fn process_messages_task(
        client: Arc<Mutex<C>>,
        config: MqttConfig,
        entities: Entities,
        to_engine: FromIntegrationSender,
    ) {
        loop {
            // Poll with a timeout so the client lock is released regularly
            let msg = {
                let mut client_guard = client.lock().await;
                tokio::time::timeout(
                    std::time::Duration::from_millis(100),
                    client_guard.poll_message(),
                )
                .await
                .unwrap_or_default()
            };

            match msg {
                Some(msg) => {
                    if let Err(e) = Self::handle_mqtt_message_static(
                        &msg,
                        &config,
                        &client,
                        &entities,
                        &to_engine,
                    )
                    .await
                    {
                        warn!("Error handling message on {}: {}", msg.topic, e);
                    }
                }
                None => {
                    // No message available, yield to allow other tasks (like publishing)
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Dispatch one incoming message by topic
    async fn handle_mqtt_message_static(
        msg: &MqttMessage,
        config: &MqttConfig,
        client: &Arc<Mutex<C>>,
        entities: &Entities,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        debug!("Received message on topic: {}", msg.topic);

        if msg.topic.starts_with(&config.discovery_prefix) && msg.topic.ends_with("/config") {
            return Self::handle_discovery_static(msg, config, client, entities, to_engine).await;
        }
        if let Some(door_id) = garage::parse_command_topic(&msg.topic, &config.base_topic) {
            return Self::handle_cover_command_static(msg, door_id, to_engine).await;
        }
        Self::handle_state_update_static(msg, entities, to_engine).await
    }

    /// Handle a discovery message (static version for background task)
    async fn handle_discovery_static(
        msg: &MqttMessage,
        config: &MqttConfig,
        client: &Arc<Mutex<C>>,
        entities: &Entities,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let (component, node_id, object_id) =
            parse_discovery_topic(&msg.topic, &config.discovery_prefix)
                .ok_or_else(|| invalid_data("Failed to parse discovery topic"))?;

        debug!(
            "Discovery: component={}, node_id={}, object_id={}",
            component, node_id, object_id
        );

        if !DISCOVERY_COMPONENTS.contains(&component.as_str()) {
            debug!("Ignoring unsupported component: {}", component);
            return Ok(());
        }

        if msg.payload.is_empty() {
            return Self::handle_removal_static(&msg.topic, client, entities, to_engine).await;
        }

        let discovery: DiscoveryMessage = serde_json::from_slice(&msg.payload)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
        let entity_id = entity_id_for(&component, &node_id, &object_id, &discovery);

        let mut topics: Vec<String> = discovery
            .availability
            .iter()
            .flatten()
            .map(|a| a.topic.clone())
            .chain(discovery.availability_topic.clone())
            .collect();

        match component.as_str() {
            "binary_sensor" => {
                let sensor =
                    BinarySensor::from_discovery(discovery, entity_id.clone(), node_id.clone())
                        .map_err(|e| invalid_data(e.to_string()))?;
                info!(
                    "Discovered {} entity: {} ({})",
                    sensor.platform(),
                    sensor.name,
                    sensor.entity_id()
                );
                topics.push(sensor.state_topic.clone());
                entities
                    .binary_sensors
                    .lock()
                    .await
                    .insert(entity_id.clone(), Arc::new(Mutex::new(sensor)));
            }
            _ => {
                let domain: ToggleDomain = component
                    .parse()
                    .map_err(|_| invalid_data(format!("Unsupported component: {}", component)))?;
                let toggle =
                    ToggleEntity::from_discovery(discovery, domain, entity_id.clone(), node_id)
                        .map_err(|e| invalid_data(e.to_string()))?;
                info!(
                    "Discovered {} entity: {} ({})",
                    toggle.platform(),
                    toggle.name,
                    toggle.entity_id()
                );
                topics.extend(toggle.state_topic.clone());
                entities
                    .toggles
                    .lock()
                    .await
                    .insert(entity_id.clone(), Arc::new(Mutex::new(toggle)));
            }
        }
        entities
            .discovery_topics
            .lock()
            .await
            .insert(msg.topic.clone(), entity_id.clone());

        // Subscribe after map insert so the retained state message finds the
        // entity already in the map, regardless of concurrency model.
        {
            let mut client_guard = client.lock().await;
            for topic in &topics {
                client_guard.subscribe(topic).await?;
            }
        }

        Self::register_entity_static(&entity_id, to_engine).await;

        Ok(())
    }

    /// Forget the entity announced on `discovery_topic`
    async fn handle_removal_static(
        discovery_topic: &str,
        client: &Arc<Mutex<C>>,
        entities: &Entities,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let Some(entity_id) = entities.discovery_topics.lock().await.remove(discovery_topic) else {
            return Ok(());
        };

        let mut topics: Vec<String> = Vec::new();
        if let Some(sensor) = entities.binary_sensors.lock().await.remove(&entity_id) {
            let sensor = sensor.lock().await;
            topics.push(sensor.state_topic.clone());
            topics.extend(sensor.availability.topics().map(str::to_string));
        }
        if let Some(toggle) = entities.toggles.lock().await.remove(&entity_id) {
            let toggle = toggle.lock().await;
            topics.extend(toggle.state_topic.clone());
            topics.extend(toggle.availability.topics().map(str::to_string));
        }
        info!("Removed entity: {}", entity_id);

        // Topics are shared between entities of one device
        let in_use = entities.topics_in_use().await;
        {
            let mut client_guard = client.lock().await;
            for topic in topics.iter().filter(|t| !in_use.contains(t)) {
                client_guard.unsubscribe(topic).await?;
            }
        }

        Self::notify_entity_removed_static(&entity_id, to_engine).await;
        Ok(())
    }

    /// Turn a payload on a door's command topic into a cover command
    async fn handle_cover_command_static(
        msg: &MqttMessage,
        door_id: DoorId,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let payload = String::from_utf8_lossy(&msg.payload);
        let command: CoverCommand = payload.trim().parse().map_err(|_| {
            invalid_data(format!("Unknown cover command for {}: {}", door_id, payload))
        })?;

        info!("Received {} command for door {}", command, door_id);
        let msg = FromIntegrationMessage::CoverCommand { door_id, command };
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send CoverCommand message: {}", e);
        }
        Ok(())
    }

    /// Handle a state or availability update (static version for background
    /// task)
    ///
    /// Zigbee2MQTT devices share one state topic across entities, so every
    /// entity tracking the topic is updated. Only changed readings are
    /// reported.
    async fn handle_state_update_static(
        msg: &MqttMessage,
        entities: &Entities,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let mut changed_sensors: Vec<(String, Reading)> = Vec::new();
        {
            let sensors_guard = entities.binary_sensors.lock().await;
            for (entity_id, sensor_arc) in sensors_guard.iter() {
                let mut sensor = sensor_arc.lock().await;
                let before = sensor.reading();
                let tracked_availability = sensor.availability.update(&msg.topic, &msg.payload);
                if msg.topic == sensor.state_topic {
                    debug!("State update for binary sensor: {}", entity_id);
                    if let Err(e) = sensor.update_state(&msg.payload) {
                        warn!("Invalid state payload for {}: {}", entity_id, e);
                    }
                } else if !tracked_availability {
                    continue;
                }
                let after = sensor.reading();
                if after != before {
                    changed_sensors.push((entity_id.clone(), after));
                }
            }
        }

        let mut changed_toggles: Vec<(String, Reading)> = Vec::new();
        {
            let toggles_guard = entities.toggles.lock().await;
            for (entity_id, toggle_arc) in toggles_guard.iter() {
                let mut toggle = toggle_arc.lock().await;
                let before = toggle.reading();
                let tracked_availability = toggle.availability.update(&msg.topic, &msg.payload);
                if toggle.state_topic.as_deref() == Some(msg.topic.as_str()) {
                    debug!("State update for {}: {}", toggle.domain, entity_id);
                    if let Err(e) = toggle.update_state(&msg.payload) {
                        warn!("Invalid state payload for {}: {}", entity_id, e);
                    }
                } else if !tracked_availability {
                    continue;
                }
                let after = toggle.reading();
                if after != before {
                    changed_toggles.push((entity_id.clone(), after));
                }
            }
        }

        for (entity_id, reading) in changed_sensors {
            let msg = FromIntegrationMessage::BinarySensorStateChanged { entity_id, reading };
            if let Err(e) = to_engine.send(msg).await {
                warn!("Failed to send BinarySensorStateChanged message: {}", e);
            }
        }
        for (entity_id, reading) in changed_toggles {
            let msg = FromIntegrationMessage::ToggleEntityStateChanged { entity_id, reading };
            if let Err(e) = to_engine.send(msg).await {
                warn!("Failed to send ToggleEntityStateChanged message: {}", e);
            }
        }

        Ok(())
    }

    /// Register an entity with the engine (static version)
    async fn register_entity_static(entity_id: &str, to_engine: &FromIntegrationSender) {
        let msg = FromIntegrationMessage::EntityDiscovered {
            entity_id: entity_id.to_string(),
            integration_name: "mqtt".to_string(),
        };
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send EntityDiscovered message: {}", e);
        } else {
            info!("Registered entity: {}", entity_id);
        }
    }

    /// Notify the engine that an entity has been removed (static version)
    async fn notify_entity_removed_static(entity_id: &str, to_engine: &FromIntegrationSender) {
        let msg = FromIntegrationMessage::EntityRemoved {
            entity_id: entity_id.to_string(),
        };
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send EntityRemoved message: {}", e);
        } else {
            info!("Notified engine of entity removal: {}", entity_id);
        }
    }

    async fn publish_all(&self, publishes: Vec<Publish>) -> Result<(), Box<dyn Error + Send>> {
        let mut client = self.client.lock().await;
        for publish in publishes {
            client
                .publish(&publish.topic, &publish.payload, publish.retain)
                .await?;
        }
        Ok(())
    }

    fn topics_for(&self, door_id: &DoorId) -> GarageTopics {
        GarageTopics::new(door_id, &self.config.discovery_prefix, &self.config.base_topic)
    }

    /// Flip a switch or light used as a door relay
    pub async fn send_toggle(&self, entity_id: &str) -> Result<(), Box<dyn Error + Send>> {
        let toggle_arc = self
            .entities
            .toggles
            .lock()
            .await
            .get(entity_id)
            .cloned()
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Toggle entity not found: {}", entity_id),
                ))
            })?;

        let (command_topic, payload) = {
            let toggle = toggle_arc.lock().await;
            let payload = toggle
                .toggle_payload()
                .map_err(|e| invalid_data(e.to_string()))?;
            (toggle.command_topic.clone(), payload)
        };

        {
            let mut client = self.client.lock().await;
            client.publish(&command_topic, &payload, false).await?;
        }

        info!("Sent toggle to {} on {}", entity_id, command_topic);
        Ok(())
    }
}

#[async_trait]
impl<C: MqttClient + 'static> Integration for MqttIntegration<C> {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        self.to_engine = Some(tx.clone());

        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.broker, self.config.port
        );
        {
            let mut client = self.client.lock().await;
            client.connect().await?;
        }
        info!("Connected to MQTT broker");

        let status_topic = garage::availability_topic(&self.config.base_topic);
        let command_topic = garage::command_subscription(&self.config.base_topic);
        {
            let mut client = self.client.lock().await;
            for component in DISCOVERY_COMPONENTS {
                let topic = format!("{}/{}/+/+/config", self.config.discovery_prefix, component);
                info!("Subscribing to discovery topic: {}", topic);
                client.subscribe(&topic).await?;
            }
            client.subscribe(&command_topic).await?;
            client
                .publish(&status_topic, garage::PAYLOAD_ONLINE.as_bytes(), true)
                .await?;
        }

        info!("MQTT integration setup complete, spawning message processing task...");

        let client = self.client.clone();
        let config = self.config.clone();
        let entities = self.entities.clone();

        let task = tokio::spawn(async move {
            Self::process_messages_task(client, config, entities, tx).await;
        });
        self.message_task = Some(task);

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::DoorAdded { door } => {
                info!("Publishing discovery for door {}", door.id);
                let topics = self.topics_for(&door.id);
                self.publish_all(topics.discovery(&door)).await?;
                self.doors.insert(door.id, topics);
            }
            ToIntegrationMessage::DoorRemoved { door_id } => {
                if let Some(topics) = self.doors.remove(&door_id) {
                    info!("Removing door {}", door_id);
                    self.publish_all(topics.removal()).await?;
                }
            }
            ToIntegrationMessage::PublishDoorState { door } => {
                debug!("Publishing state for door {}: {}", door.id, door.state);
                let publishes = match self.doors.get(&door.id) {
                    Some(topics) => topics.state(&door),
                    None => self.topics_for(&door.id).state(&door),
                };
                self.publish_all(publishes).await?;
            }
            ToIntegrationMessage::Toggle { entity_id, domain } => {
                info!("Handling {} for {}", domain.service(), entity_id);
                self.send_toggle(&entity_id).await?;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("MQTT integration shutting down");
        if let Some(task) = self.message_task.take() {
            task.abort();
        }
        if self.to_engine.is_some() {
            let status_topic = garage::availability_topic(&self.config.base_topic);
            let mut client = self.client.lock().await;
            client
                .publish(&status_topic, garage::PAYLOAD_OFFLINE.as_bytes(), true)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::DoorInfo;
    use crate::engine::state::DoorAttributes;
    use crate::integrations::mqtt::client::MockMqttClient;

    type MockIntegration = MqttIntegration<MockMqttClient>;

    fn config() -> MqttConfig {
        MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            base_topic: "smart_garage".to_string(),
            username: None,
            password: None,
        }
    }

    fn message(topic: &str, payload: &[u8]) -> MqttMessage {
        MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain: false,
        }
    }

    const CONTACT_CONFIG: &str = "homeassistant/binary_sensor/garage_closed/contact/config";
    const RELAY_CONFIG: &str = "homeassistant/switch/garage_relay/switch/config";

    fn contact_payload() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "name": "Garage Closed",
            "object_id": "garage_closed",
            "state_topic": "zigbee2mqtt/garage_closed",
            "value_template": "{{ value_json.contact }}",
            "payload_on": true,
            "payload_off": false,
            "availability": [{ "topic": "zigbee2mqtt/garage_closed/availability" }],
            "availability_mode": "all",
        }))
        .unwrap()
    }

    fn relay_payload() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "name": "Garage Relay",
            "object_id": "garage_relay",
            "state_topic": "zigbee2mqtt/garage_relay",
            "command_topic": "zigbee2mqtt/garage_relay/set",
            "value_template": "{{ value_json.state }}",
        }))
        .unwrap()
    }

    struct Harness {
        client: Arc<Mutex<MockMqttClient>>,
        entities: Entities,
        tx: FromIntegrationSender,
        rx: mpsc::Receiver<FromIntegrationMessage>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(32);
            Self {
                client: Arc::new(Mutex::new(MockMqttClient::new())),
                entities: Entities::default(),
                tx,
                rx,
            }
        }

        async fn deliver(&self, topic: &str, payload: &[u8]) {
            MockIntegration::handle_mqtt_message_static(
                &message(topic, payload),
                &config(),
                &self.client,
                &self.entities,
                &self.tx,
            )
            .await
            .unwrap();
        }

        fn drain(&mut self) -> Vec<FromIntegrationMessage> {
            let mut messages = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                messages.push(msg);
            }
            messages
        }
    }

    #[tokio::test]
    async fn test_mqtt_integration_creation() {
        let integration = MqttIntegration::new(MockMqttClient::new(), &config());

        assert!(integration.entities.binary_sensors.lock().await.is_empty());
        assert!(integration.entities.toggles.lock().await.is_empty());
        assert!(integration.doors.is_empty());
    }

    #[tokio::test]
    async fn test_setup_subscribes_and_announces_online() {
        let mut integration = MqttIntegration::new(MockMqttClient::new(), &config());
        let (tx, _rx) = mpsc::channel(8);
        integration.setup(tx).await.unwrap();

        {
            let client = integration.client.lock().await;
            assert!(client.is_connected);
            assert!(client
                .subscriptions
                .contains(&"homeassistant/binary_sensor/+/+/config".to_string()));
            assert!(client
                .subscriptions
                .contains(&"homeassistant/switch/+/+/config".to_string()));
            assert!(client
                .subscriptions
                .contains(&"homeassistant/light/+/+/config".to_string()));
            assert!(client.subscriptions.contains(&"smart_garage/+/set".to_string()));
            assert_eq!(client.published_to("smart_garage/status"), vec!["online"]);
        }

        integration.shutdown().await.unwrap();
        let client = integration.client.lock().await;
        assert_eq!(
            client.published_to("smart_garage/status"),
            vec!["online", "offline"]
        );
    }

    #[tokio::test]
    async fn test_binary_sensor_discovery_and_state() {
        let mut harness = Harness::new();
        harness.deliver(CONTACT_CONFIG, &contact_payload()).await;

        assert_eq!(
            harness.drain(),
            vec![FromIntegrationMessage::EntityDiscovered {
                entity_id: "binary_sensor.garage_closed".to_string(),
                integration_name: "mqtt".to_string(),
            }]
        );
        {
            let client = harness.client.lock().await;
            assert!(client.subscriptions.contains(&"zigbee2mqtt/garage_closed".to_string()));
            assert!(client
                .subscriptions
                .contains(&"zigbee2mqtt/garage_closed/availability".to_string()));
        }

        // Unavailable until the availability topic reports online
        harness
            .deliver("zigbee2mqtt/garage_closed", br#"{"contact": true}"#)
            .await;
        assert!(harness.drain().is_empty());

        harness
            .deliver("zigbee2mqtt/garage_closed/availability", b"online")
            .await;
        assert_eq!(
            harness.drain(),
            vec![FromIntegrationMessage::BinarySensorStateChanged {
                entity_id: "binary_sensor.garage_closed".to_string(),
                reading: Reading::On,
            }]
        );

        // Same reading again, nothing to report
        harness
            .deliver("zigbee2mqtt/garage_closed", br#"{"contact": true, "battery": 90}"#)
            .await;
        assert!(harness.drain().is_empty());

        harness
            .deliver("zigbee2mqtt/garage_closed", br#"{"contact": false}"#)
            .await;
        assert_eq!(
            harness.drain(),
            vec![FromIntegrationMessage::BinarySensorStateChanged {
                entity_id: "binary_sensor.garage_closed".to_string(),
                reading: Reading::Off,
            }]
        );

        harness
            .deliver("zigbee2mqtt/garage_closed/availability", b"offline")
            .await;
        assert_eq!(
            harness.drain(),
            vec![FromIntegrationMessage::BinarySensorStateChanged {
                entity_id: "binary_sensor.garage_closed".to_string(),
                reading: Reading::Unavailable,
            }]
        );
    }

    #[tokio::test]
    async fn test_entity_removal_unsubscribes() {
        let mut harness = Harness::new();
        harness.deliver(CONTACT_CONFIG, &contact_payload()).await;
        harness.drain();

        harness.deliver(CONTACT_CONFIG, b"").await;
        assert_eq!(
            harness.drain(),
            vec![FromIntegrationMessage::EntityRemoved {
                entity_id: "binary_sensor.garage_closed".to_string(),
            }]
        );
        assert!(harness.entities.binary_sensors.lock().await.is_empty());

        let client = harness.client.lock().await;
        assert!(!client.subscriptions.contains(&"zigbee2mqtt/garage_closed".to_string()));

        // A second removal is a no-op
        drop(client);
        harness.deliver(CONTACT_CONFIG, b"").await;
        assert!(harness.drain().is_empty());
    }

    #[tokio::test]
    async fn test_shared_state_topic_survives_removal() {
        let mut harness = Harness::new();
        harness.deliver(CONTACT_CONFIG, &contact_payload()).await;
        let tamper = serde_json::to_vec(&serde_json::json!({
            "object_id": "garage_closed_tamper",
            "state_topic": "zigbee2mqtt/garage_closed",
            "value_template": "{{ value_json.tamper }}",
            "payload_on": true,
            "payload_off": false,
        }))
        .unwrap();
        harness
            .deliver("homeassistant/binary_sensor/garage_closed/tamper/config", &tamper)
            .await;
        harness.drain();

        harness
            .deliver("homeassistant/binary_sensor/garage_closed/tamper/config", b"")
            .await;

        let client = harness.client.lock().await;
        assert!(client.subscriptions.contains(&"zigbee2mqtt/garage_closed".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_payload_on_shared_topic() {
        let mut harness = Harness::new();
        harness.deliver(CONTACT_CONFIG, &contact_payload()).await;
        let tamper = serde_json::to_vec(&serde_json::json!({
            "object_id": "garage_closed_tamper",
            "state_topic": "zigbee2mqtt/garage_closed",
            "value_template": "{{ value_json.tamper }}",
            "payload_on": true,
            "payload_off": false,
        }))
        .unwrap();
        harness
            .deliver("homeassistant/binary_sensor/garage_closed/tamper/config", &tamper)
            .await;
        harness
            .deliver("zigbee2mqtt/garage_closed/availability", b"online")
            .await;
        harness
            .deliver("zigbee2mqtt/garage_closed", br#"{"contact": true, "tamper": false}"#)
            .await;
        harness.drain();

        // Every entity on the topic drops to unavailable, not just the first
        harness.deliver("zigbee2mqtt/garage_closed", b"\xff\xfe").await;
        let mut changed: Vec<(String, Reading)> = harness
            .drain()
            .into_iter()
            .filter_map(|msg| match msg {
                FromIntegrationMessage::BinarySensorStateChanged { entity_id, reading } => {
                    Some((entity_id, reading))
                }
                _ => None,
            })
            .collect();
        changed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            changed,
            vec![
                ("binary_sensor.garage_closed".to_string(), Reading::Unavailable),
                ("binary_sensor.garage_closed_tamper".to_string(), Reading::Unavailable),
            ]
        );
    }

    #[tokio::test]
    async fn test_toggle_discovery_and_state() {
        let mut harness = Harness::new();
        harness.deliver(RELAY_CONFIG, &relay_payload()).await;
        assert_eq!(
            harness.drain(),
            vec![FromIntegrationMessage::EntityDiscovered {
                entity_id: "switch.garage_relay".to_string(),
                integration_name: "mqtt".to_string(),
            }]
        );

        harness
            .deliver("zigbee2mqtt/garage_relay", br#"{"state": "ON"}"#)
            .await;
        assert_eq!(
            harness.drain(),
            vec![FromIntegrationMessage::ToggleEntityStateChanged {
                entity_id: "switch.garage_relay".to_string(),
                reading: Reading::On,
            }]
        );
    }

    #[tokio::test]
    async fn test_cover_command_topic() {
        let mut harness = Harness::new();
        harness.deliver("smart_garage/main_garage/set", b"OPEN").await;
        harness.deliver("smart_garage/main_garage/set", b"stop").await;

        assert_eq!(
            harness.drain(),
            vec![
                FromIntegrationMessage::CoverCommand {
                    door_id: DoorId::from_name("main_garage"),
                    command: CoverCommand::Open,
                },
                FromIntegrationMessage::CoverCommand {
                    door_id: DoorId::from_name("main_garage"),
                    command: CoverCommand::Stop,
                },
            ]
        );

        let result = MockIntegration::handle_mqtt_message_static(
            &message("smart_garage/main_garage/set", b"JUMP"),
            &config(),
            &harness.client,
            &harness.entities,
            &harness.tx,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_component_is_ignored() {
        let mut harness = Harness::new();
        harness
            .deliver(
                "homeassistant/sensor/garage_closed/battery/config",
                br#"{"state_topic": "zigbee2mqtt/garage_closed"}"#,
            )
            .await;
        assert!(harness.drain().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_command_publishes_payload() {
        let mut integration = MqttIntegration::new(MockMqttClient::new(), &config());
        let harness = Harness {
            client: integration.client.clone(),
            entities: integration.entities.clone(),
            ..Harness::new()
        };
        harness.deliver(RELAY_CONFIG, &relay_payload()).await;
        harness
            .deliver("zigbee2mqtt/garage_relay", br#"{"state": "OFF"}"#)
            .await;

        integration
            .handle_message(ToIntegrationMessage::Toggle {
                entity_id: "switch.garage_relay".to_string(),
                domain: ToggleDomain::Switch,
            })
            .await
            .unwrap();

        let client = integration.client.lock().await;
        assert_eq!(client.published_to("zigbee2mqtt/garage_relay/set"), vec!["ON"]);
        drop(client);

        let missing = integration
            .handle_message(ToIntegrationMessage::Toggle {
                entity_id: "switch.unknown".to_string(),
                domain: ToggleDomain::Switch,
            })
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_door_lifecycle_publishes() {
        let mut integration = MqttIntegration::new(MockMqttClient::new(), &config());
        let door_id = DoorId::from_name("Main Garage");
        let door = DoorInfo {
            id: door_id.clone(),
            name: "Main Garage".to_string(),
            attributes: DoorAttributes {
                open_sensor: "binary_sensor.garage_open".to_string(),
                closed_sensor: "binary_sensor.garage_closed".to_string(),
                toggle_entity: "switch.garage_relay".to_string(),
                opening_duration: 35,
            },
        };

        integration
            .handle_message(ToIntegrationMessage::DoorAdded { door })
            .await
            .unwrap();
        {
            let client = integration.client.lock().await;
            let config = client
                .published_to("homeassistant/cover/smart_garage_main_garage/cover/config");
            assert_eq!(config.len(), 1);
            assert!(config[0].contains("\"device_class\":\"garage\""));
        }

        integration
            .handle_message(ToIntegrationMessage::DoorRemoved { door_id })
            .await
            .unwrap();
        let client = integration.client.lock().await;
        let config =
            client.published_to("homeassistant/cover/smart_garage_main_garage/cover/config");
        assert_eq!(config.len(), 2);
        assert_eq!(config[1], "");
        assert_eq!(
            client.published_to("smart_garage/main_garage/availability"),
            vec!["offline"]
        );
        assert!(integration.doors.is_empty());
    }
}
