//! Type-safe message system for garaged
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations
//! - `ControlMessage`: Requests from the API and the binary to the engine

use super::state::CoverCommand;
use super::state::DoorId;
use super::state::DoorInfo;
use super::state::DoorSnapshot;
use super::state::Reading;
use super::state::ToggleDomain;
use crate::config::GarageConfig;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone, PartialEq)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
    },

    /// An entity was removed (device unpaired, discovery cleared, etc.)
    EntityRemoved { entity_id: String },

    /// A binary sensor's reading changed (door open/closed sensors)
    BinarySensorStateChanged { entity_id: String, reading: Reading },

    /// A switch or light usable as a door relay changed
    ToggleEntityStateChanged { entity_id: String, reading: Reading },

    /// A cover command arrived through an integration (e.g. an MQTT command
    /// topic)
    CoverCommand {
        door_id: DoorId,
        command: CoverCommand,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone, PartialEq)]
pub enum ToIntegrationMessage {
    /// A door was set up; integrations may expose its entities
    DoorAdded { door: DoorInfo },

    /// A door was torn down
    DoorRemoved { door_id: DoorId },

    /// A door's sensor or cover changed
    PublishDoorState { door: DoorSnapshot },

    /// Invoke the toggle service on a relay entity
    Toggle {
        entity_id: String,
        domain: ToggleDomain,
    },
}

/// Requests handled by the engine's main loop
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Run a cover command against a door
    Cover {
        door_id: DoorId,
        command: CoverCommand,
    },

    /// Set up a door at runtime
    AddDoor { garage: GarageConfig },

    /// Tear a door down
    RemoveDoor { door_id: DoorId },

    /// Stop the engine and its integrations
    Shutdown,
}
