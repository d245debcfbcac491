//! Cover entity for a garage door.
//!
//! The cover mirrors the door's published sensor state and forwards commands
//! to the door controller, which decides whether the relay is toggled.

use tokio::time::Instant;

use super::door::CommandOutcome;
use super::door::DoorController;
use super::door::Publication;
use super::state::CoverCommand;
use super::state::CoverSnapshot;
use super::state::CoverState;
use super::state::DoorId;
use super::state::DoorState;

pub const DEVICE_CLASS: &str = "garage";

/// Every cover supports open, close and stop.
pub const SUPPORTED_FEATURES: [CoverCommand; 3] =
    [CoverCommand::Open, CoverCommand::Close, CoverCommand::Stop];

#[derive(Debug, Clone)]
pub struct Cover {
    entity_id: String,
    /// Latest publication of the door's sensor entity. `None` until the door
    /// publishes for the first time.
    sensor: Option<Publication>,
}

impl Cover {
    pub fn new(door_id: &DoorId) -> Self {
        Self {
            entity_id: door_id.cover_entity_id(),
            sensor: None,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn update_from_sensor(&mut self, publication: Publication) {
        self.sensor = Some(publication);
    }

    fn door_state(&self) -> DoorState {
        self.sensor
            .map(|p| p.state)
            .unwrap_or(DoorState::Unavailable)
    }

    pub fn state(&self) -> CoverState {
        self.door_state().into()
    }

    /// Available while the sensor entity exists, is available and reports a
    /// state other than `unavailable`.
    pub fn available(&self) -> bool {
        match self.sensor {
            Some(p) => p.available && p.state != DoorState::Unavailable,
            None => false,
        }
    }

    /// Unknown position is `None`, not `false`.
    pub fn is_closed(&self) -> Option<bool> {
        match self.door_state() {
            DoorState::Closed => Some(true),
            DoorState::Open => Some(false),
            DoorState::Opening | DoorState::Unavailable => None,
        }
    }

    pub fn is_opening(&self) -> bool {
        self.door_state() == DoorState::Opening
    }

    pub fn icon(&self) -> &'static str {
        match self.door_state() {
            DoorState::Opening => "mdi:garage-alert",
            DoorState::Open => "mdi:garage-open",
            DoorState::Closed | DoorState::Unavailable => "mdi:garage",
        }
    }

    pub fn snapshot(&self) -> CoverSnapshot {
        CoverSnapshot {
            state: self.state(),
            available: self.available(),
            is_closed: self.is_closed(),
            is_opening: self.is_opening(),
            icon: self.icon(),
        }
    }

    pub fn open(&self, door: &mut DoorController, now: Instant) -> CommandOutcome {
        self.handle_command(door, CoverCommand::Open, now)
    }

    pub fn close(&self, door: &mut DoorController, now: Instant) -> CommandOutcome {
        self.handle_command(door, CoverCommand::Close, now)
    }

    pub fn stop(&self, door: &mut DoorController, now: Instant) -> CommandOutcome {
        self.handle_command(door, CoverCommand::Stop, now)
    }

    /// Commands are gated on the door's state recomputed at `now`, not on the
    /// value this cover last mirrored.
    pub fn handle_command(
        &self,
        door: &mut DoorController,
        command: CoverCommand,
        now: Instant,
    ) -> CommandOutcome {
        door.command(command, now)
    }
}
