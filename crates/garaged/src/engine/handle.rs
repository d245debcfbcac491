use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use super::message::ControlMessage;
use super::state::CoverCommand;
use super::state::DoorId;
use super::state::DoorSnapshot;
use super::state::Snapshot;
use crate::config::GarageConfig;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("garage door '{0}' is not set up")]
    UnknownDoor(DoorId),

    #[error("engine is not running")]
    NotRunning,
}

/// Cloneable handle to a running [`Engine`](super::Engine).
///
/// Reads go straight to the latest snapshot. Writes are queued to the engine
/// loop and take effect asynchronously.
#[derive(Clone)]
pub struct EngineHandle {
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    snapshot: Arc<ArcSwap<Snapshot>>,
}

impl EngineHandle {
    pub(super) fn new(
        control_tx: mpsc::UnboundedSender<ControlMessage>,
        snapshot: Arc<ArcSwap<Snapshot>>,
    ) -> Self {
        Self {
            control_tx,
            snapshot,
        }
    }

    /// Handle backed by a fixed snapshot, with the control channel exposed
    /// to the caller instead of an engine.
    #[cfg(test)]
    pub(crate) fn detached(snapshot: Snapshot) -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = Self::new(control_tx, Arc::new(ArcSwap::from_pointee(snapshot)));
        (handle, control_rx)
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn door(&self, door_id: &DoorId) -> Option<DoorSnapshot> {
        self.snapshot.load().doors.get(door_id).cloned()
    }

    /// Queue a cover command for a door that is currently set up.
    pub fn cover_command(&self, door_id: DoorId, command: CoverCommand) -> Result<(), EngineError> {
        if !self.snapshot.load().doors.contains_key(&door_id) {
            return Err(EngineError::UnknownDoor(door_id));
        }
        self.send(ControlMessage::Cover { door_id, command })
    }

    pub fn add_door(&self, garage: GarageConfig) -> Result<(), EngineError> {
        self.send(ControlMessage::AddDoor { garage })
    }

    pub fn remove_door(&self, door_id: DoorId) -> Result<(), EngineError> {
        self.send(ControlMessage::RemoveDoor { door_id })
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(ControlMessage::Shutdown)
    }

    fn send(&self, msg: ControlMessage) -> Result<(), EngineError> {
        self.control_tx
            .send(msg)
            .map_err(|_| EngineError::NotRunning)
    }
}
