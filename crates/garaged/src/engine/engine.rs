use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::cover::Cover;
use super::door::DoorController;
use super::door::Effects;
use super::door::Publication;
use super::door::Rejection;
use super::door::ToggleAction;
use super::handle::EngineHandle;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::ToIntegrationSender;
use super::message::ControlMessage;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::CoverCommand;
use super::state::DoorId;
use super::state::DoorInfo;
use super::state::DoorSnapshot;
use super::state::Reading;
use super::state::Snapshot;
use super::timer::RECHECK_CHANNEL_SIZE;
use super::timer::RecheckEvent;
use super::timer::RecheckTimers;
use crate::config::EngineConfig;
use crate::config::GarageConfig;

/// A configured door: its controller plus the cover mirroring it.
struct Door {
    controller: DoorController,
    cover: Cover,
}

impl Door {
    fn info(&self) -> DoorInfo {
        DoorInfo {
            id: self.controller.id().clone(),
            name: self.controller.config().name.clone(),
            attributes: self.controller.attributes(),
        }
    }

    fn snapshot(&self, publication: Publication) -> DoorSnapshot {
        let id = self.controller.id();
        DoorSnapshot {
            id: id.clone(),
            name: self.controller.config().name.clone(),
            sensor_entity_id: id.sensor_entity_id(),
            cover_entity_id: self.cover.entity_id().to_string(),
            state: publication.state,
            available: publication.available,
            cover: self.cover.snapshot(),
            attributes: self.controller.attributes(),
        }
    }
}

/// garaged engine
///
/// This structure owns every door and is the only place their state changes.
/// Integration events, cover commands and recheck timers are all serialized
/// through its main loop, so a door never observes two inputs at once.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    snapshot: Arc<ArcSwap<Snapshot>>,

    /// Doors waiting for the discovery window to close. `None` once set up.
    pending: Option<Vec<GarageConfig>>,

    discovery_timeout: Duration,

    doors: BTreeMap<DoorId, Door>,

    /// Map of entity_id -> doors tracking it
    subscriptions: HashMap<String, Vec<DoorId>>,

    /// Latest reading of every entity reported so far
    readings: HashMap<String, Reading>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: HashMap<String, String>,

    /// Communication channels to integrations (for commands)
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Receive messages from integrations (events)
    message_rx: FromIntegrationReceiver,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,

    recheck_rx: mpsc::Receiver<RecheckEvent>,
    timers: RecheckTimers,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

impl Engine {
    /// Create a new Engine instance
    ///
    /// `garages` are set up once `discovery_timeout` has elapsed after
    /// [`Engine::run`] starts, giving integrations time to report their
    /// entities.
    pub fn new(garages: Vec<GarageConfig>, config: &EngineConfig) -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (recheck_tx, recheck_rx) = mpsc::channel(RECHECK_CHANNEL_SIZE);
        Self {
            snapshot: Arc::new(ArcSwap::new(Arc::default())),
            pending: Some(garages),
            discovery_timeout: config.discovery_timeout,
            doors: BTreeMap::new(),
            subscriptions: HashMap::new(),
            readings: HashMap::new(),
            entity_integration_map: HashMap::new(),
            integration_channels: HashMap::new(),
            message_rx,
            message_tx,
            control_rx,
            control_tx,
            recheck_rx,
            timers: RecheckTimers::new(recheck_tx),
            integration_handles: Vec::new(),
        }
    }

    /// Create an engine for the doors and settings of `cfg`.
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self::new(cfg.garages.clone(), &cfg.engine)
    }

    /// Handle for the API and the binary. Stays usable after `run` consumes
    /// the engine.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.control_tx.clone(), self.snapshot.clone())
    }

    /// Register integrations from configuration
    ///
    /// This is a convenience method that checks the config and registers
    /// any enabled integrations.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        info!("Registering integration '{}'", name);
        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    /// Run the engine's main event loop until a shutdown is requested.
    pub async fn run(mut self) {
        info!(
            "Engine starting, setting up doors in {:?}",
            self.discovery_timeout
        );

        let setup = tokio::time::sleep(self.discovery_timeout);
        tokio::pin!(setup);

        loop {
            tokio::select! {
                () = &mut setup, if self.pending.is_some() => {
                    self.setup_pending_doors();
                }
                Some(msg) = self.message_rx.recv() => {
                    self.handle_event(msg);
                }
                Some(event) = self.recheck_rx.recv() => {
                    self.handle_recheck(event);
                }
                Some(msg) = self.control_rx.recv() => {
                    if matches!(msg, ControlMessage::Shutdown) {
                        break;
                    }
                    self.handle_control(msg);
                }
            }
        }

        info!("Engine shutting down");
        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        self.timers.cancel_all();

        // Dropping the senders ends each integration's command loop, which
        // then runs its own shutdown.
        self.integration_channels.clear();
        for handle in self.integration_handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Integration task failed: {}", e);
            }
        }
    }

    fn setup_pending_doors(&mut self) {
        let garages = self.pending.take().unwrap_or_default();
        info!(
            "Discovery window closed with {} entities known, setting up {} doors",
            self.entity_integration_map.len(),
            garages.len()
        );
        for garage in garages {
            self.setup_door(garage);
        }
    }

    /// Handle an event from an integration
    fn handle_event(&mut self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                // Readings are not populated until the first state-change message arrives.
                self.entity_integration_map
                    .insert(entity_id, integration_name);
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                self.entity_integration_map.remove(&entity_id);
                self.readings.remove(&entity_id);
                self.route_reading(&entity_id, Reading::Unavailable);
            }
            FromIntegrationMessage::BinarySensorStateChanged { entity_id, reading } => {
                debug!("Binary sensor state changed: {} -> {}", entity_id, reading);
                self.readings.insert(entity_id.clone(), reading);
                self.route_reading(&entity_id, reading);
            }
            FromIntegrationMessage::ToggleEntityStateChanged { entity_id, reading } => {
                debug!("Toggle entity state changed: {} -> {}", entity_id, reading);
                self.readings.insert(entity_id.clone(), reading);
                self.route_reading(&entity_id, reading);
            }
            FromIntegrationMessage::CoverCommand { door_id, command } => {
                self.handle_cover_command(&door_id, command);
            }
        }
    }

    fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Cover { door_id, command } => {
                self.handle_cover_command(&door_id, command);
            }
            ControlMessage::AddDoor { garage } => match &mut self.pending {
                Some(pending) => pending.push(garage),
                None => self.setup_door(garage),
            },
            ControlMessage::RemoveDoor { door_id } => {
                if let Some(pending) = &mut self.pending {
                    pending.retain(|g| g.id() != door_id);
                }
                self.remove_door(&door_id);
            }
            // Handled by the main loop
            ControlMessage::Shutdown => {}
        }
    }

    fn handle_recheck(&mut self, event: RecheckEvent) {
        if !self.timers.fire(&event) {
            return;
        }
        let now = Instant::now();
        let effects = match self.doors.get_mut(&event.door_id) {
            Some(door) => door.controller.recheck(now),
            None => return,
        };
        self.apply(&event.door_id, effects);
    }

    fn handle_cover_command(&mut self, door_id: &DoorId, command: CoverCommand) {
        let now = Instant::now();
        let Some(door) = self.doors.get_mut(door_id) else {
            warn!("Cover command {} for unknown door '{}'", command, door_id);
            return;
        };

        info!("[{}] Cover command: {}", door_id, command);
        let outcome = door.cover.handle_command(&mut door.controller, command, now);
        match &outcome.rejection {
            None => {}
            Some(rejection @ Rejection::InvalidState { .. }) => {
                debug!("[{}] Ignoring {}: {}", door_id, command, rejection);
            }
            Some(rejection) => {
                warn!("[{}] Ignoring {}: {}", door_id, command, rejection);
            }
        }
        self.apply(door_id, outcome.effects);
    }

    fn route_reading(&mut self, entity_id: &str, reading: Reading) {
        let Some(door_ids) = self.subscriptions.get(entity_id).cloned() else {
            return;
        };
        let now = Instant::now();
        for door_id in door_ids {
            let effects = match self.doors.get_mut(&door_id) {
                Some(door) => door.controller.on_reading(entity_id, reading, now),
                None => continue,
            };
            self.apply(&door_id, effects);
        }
    }

    fn setup_door(&mut self, garage: GarageConfig) {
        let id = garage.id();
        if self.doors.contains_key(&id) {
            warn!("Garage door '{}' is already set up, ignoring", id);
            return;
        }

        let mut entities: Vec<String> = Vec::new();
        for entity in garage.entities() {
            if !entities.iter().any(|e| e == entity) {
                entities.push(entity.to_string());
            }
        }
        let missing: Vec<String> = entities
            .iter()
            .filter(|e| !self.entity_integration_map.contains_key(*e))
            .cloned()
            .collect();

        let controller = if missing.is_empty() {
            let open = self.reading(&garage.open_sensor);
            let closed = self.reading(&garage.closed_sensor);
            let toggle = self.reading(&garage.toggle_entity);
            for entity in entities {
                self.subscriptions.entry(entity).or_default().push(id.clone());
            }
            info!("[{}] Garage door '{}' set up", id, garage.name);
            DoorController::new(garage, open, closed, toggle)
        } else {
            error!(
                "[{}] Garage door '{}' is misconfigured, entities not found: {}",
                id,
                garage.name,
                missing.join(", ")
            );
            DoorController::misconfigured(garage, missing)
        };

        let door = Door {
            cover: Cover::new(&id),
            controller,
        };
        self.broadcast(ToIntegrationMessage::DoorAdded { door: door.info() });
        self.doors.insert(id.clone(), door);

        let effects = match self.doors.get_mut(&id) {
            Some(door) => door.controller.refresh(Instant::now()),
            None => return,
        };
        self.apply(&id, effects);
    }

    fn remove_door(&mut self, door_id: &DoorId) {
        self.timers.cancel(door_id);
        if self.doors.remove(door_id).is_none() {
            debug!("Garage door '{}' is not set up", door_id);
            return;
        }

        for door_ids in self.subscriptions.values_mut() {
            door_ids.retain(|id| id != door_id);
        }
        self.subscriptions.retain(|_, door_ids| !door_ids.is_empty());

        {
            let mut state = Snapshot::clone(&self.snapshot.load());
            state.doors.remove(door_id);
            self.snapshot.store(Arc::new(state));
        }

        self.broadcast(ToIntegrationMessage::DoorRemoved {
            door_id: door_id.clone(),
        });
        info!("[{}] Garage door removed", door_id);
    }

    fn reading(&self, entity_id: &str) -> Reading {
        self.readings.get(entity_id).copied().unwrap_or_default()
    }

    /// Carry out what a door controller asked for.
    fn apply(&mut self, door_id: &DoorId, effects: Effects) {
        if let Some(deadline) = effects.recheck_at {
            self.timers.arm(door_id, deadline);
        }
        if let Some(publication) = effects.publish {
            self.publish(door_id, publication);
        }
        if let Some(action) = effects.toggle {
            self.dispatch_toggle(door_id, action);
        }
    }

    fn publish(&mut self, door_id: &DoorId, publication: Publication) {
        let Some(door) = self.doors.get_mut(door_id) else {
            return;
        };
        door.cover.update_from_sensor(publication);
        let snapshot = door.snapshot(publication);

        info!(
            "[{}] {} -> {} (available={})",
            door_id, snapshot.sensor_entity_id, snapshot.state, snapshot.available
        );

        {
            let mut state = Snapshot::clone(&self.snapshot.load());
            state.doors.insert(door_id.clone(), snapshot.clone());
            self.snapshot.store(Arc::new(state));
        }

        self.broadcast(ToIntegrationMessage::PublishDoorState { door: snapshot });
    }

    /// Route a toggle to the integration that owns the relay entity.
    ///
    /// Failures are logged only. The toggle has already been recorded and is
    /// not rolled back.
    fn dispatch_toggle(&self, door_id: &DoorId, action: ToggleAction) {
        info!(
            "[{}] Calling {} on {}",
            door_id,
            action.domain.service(),
            action.entity_id
        );

        let Some(integration_name) = self.entity_integration_map.get(&action.entity_id) else {
            warn!(
                "[{}] No integration found for entity: {}",
                door_id, action.entity_id
            );
            return;
        };
        let Some(tx) = self.integration_channels.get(integration_name) else {
            warn!(
                "[{}] Integration channel not found: {}",
                door_id, integration_name
            );
            return;
        };

        let msg = ToIntegrationMessage::Toggle {
            entity_id: action.entity_id,
            domain: action.domain,
        };
        if let Err(e) = tx.send(msg) {
            warn!("[{}] Failed to send toggle to '{}': {}", door_id, integration_name, e);
        }
    }

    fn broadcast(&self, msg: ToIntegrationMessage) {
        for (name, tx) in &self.integration_channels {
            if tx.send(msg.clone()).is_err() {
                debug!("Integration '{}' is no longer receiving", name);
            }
        }
    }
}
