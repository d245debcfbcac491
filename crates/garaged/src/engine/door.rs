//! Per-door controller.
//!
//! A `DoorController` owns the cached readings and the last toggle instant of
//! one garage door. Every input returns the [`Effects`] the engine has to carry
//! out; the controller itself performs no I/O and never reads a clock.

use tokio::time::Instant;
use tracing::debug;

use super::resolver::resolve;
use super::state::CoverCommand;
use super::state::DoorAttributes;
use super::state::DoorId;
use super::state::DoorState;
use super::state::Reading;
use super::state::ToggleDomain;
use crate::config::GarageConfig;

/// State and availability emitted for a door's sensor entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publication {
    pub state: DoorState,
    /// False when the door could not be set up. `unavailable` on its own is a
    /// valid runtime state and keeps the entity available.
    pub available: bool,
}

/// A toggle the engine must invoke on behalf of a door.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleAction {
    pub entity_id: String,
    pub domain: ToggleDomain,
}

/// Side effects requested by the controller.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Effects {
    pub publish: Option<Publication>,
    pub toggle: Option<ToggleAction>,
    /// Replace any pending recheck for this door with one at this instant.
    pub recheck_at: Option<Instant>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.publish.is_none() && self.toggle.is_none() && self.recheck_at.is_none()
    }

    /// Combine with effects produced later; later values win.
    fn then(self, later: Effects) -> Effects {
        Effects {
            publish: later.publish.or(self.publish),
            toggle: later.toggle.or(self.toggle),
            recheck_at: later.recheck_at.or(self.recheck_at),
        }
    }
}

/// Why a cover command had no effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("cannot {command} while the door is {state}")]
    InvalidState {
        command: CoverCommand,
        state: DoorState,
    },

    #[error("toggle entity '{entity_id}' has an unsupported entity type")]
    UnsupportedDomain { entity_id: String },

    #[error("door is misconfigured, missing entities: {}", .missing.join(", "))]
    Misconfigured { missing: Vec<String> },
}

/// Result of a cover command. Commands are always accepted; only their effect
/// is gated.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub effects: Effects,
    pub rejection: Option<Rejection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Health {
    Ready,
    /// Referenced entities were missing at setup. Stays this way until the
    /// door is set up again.
    Misconfigured { missing: Vec<String> },
}

#[derive(Debug)]
pub struct DoorController {
    id: DoorId,
    config: GarageConfig,
    health: Health,
    open: Reading,
    closed: Reading,
    toggle: Reading,
    last_toggle: Option<Instant>,
    published: Option<Publication>,
}

impl DoorController {
    /// Create a controller seeded with the current readings of its entities.
    pub fn new(config: GarageConfig, open: Reading, closed: Reading, toggle: Reading) -> Self {
        Self {
            id: config.id(),
            config,
            health: Health::Ready,
            open,
            closed,
            toggle,
            last_toggle: None,
            published: None,
        }
    }

    /// Create a controller for a door whose entities could not be found.
    pub fn misconfigured(config: GarageConfig, missing: Vec<String>) -> Self {
        Self {
            health: Health::Misconfigured { missing },
            ..Self::new(
                config,
                Reading::Unavailable,
                Reading::Unavailable,
                Reading::Unavailable,
            )
        }
    }

    pub fn id(&self) -> &DoorId {
        &self.id
    }

    pub fn config(&self) -> &GarageConfig {
        &self.config
    }

    pub fn is_misconfigured(&self) -> bool {
        matches!(self.health, Health::Misconfigured { .. })
    }

    pub fn last_toggle(&self) -> Option<Instant> {
        self.last_toggle
    }

    pub fn published(&self) -> Option<Publication> {
        self.published
    }

    pub fn attributes(&self) -> DoorAttributes {
        DoorAttributes {
            open_sensor: self.config.open_sensor.clone(),
            closed_sensor: self.config.closed_sensor.clone(),
            toggle_entity: self.config.toggle_entity.clone(),
            opening_duration: self.config.opening_duration.as_secs(),
        }
    }

    /// Resolve the door state at `now` without publishing anything.
    pub fn state(&self, now: Instant) -> DoorState {
        if self.is_misconfigured() {
            return DoorState::Unavailable;
        }
        let since_toggle = self
            .last_toggle
            .map(|at| now.saturating_duration_since(at));
        resolve(self.open, self.closed, since_toggle, self.config.opening_duration)
    }

    /// Recompute and publish if the value changed. The first call always
    /// publishes.
    pub fn refresh(&mut self, now: Instant) -> Effects {
        Effects {
            publish: self.publish_if_changed(now),
            ..Effects::default()
        }
    }

    /// The opening window may have elapsed with no new input.
    pub fn recheck(&mut self, now: Instant) -> Effects {
        if self.is_misconfigured() {
            return Effects::default();
        }
        debug!("[{}] Rechecking after opening window", self.id);
        self.refresh(now)
    }

    /// A tracked entity reported a new reading.
    pub fn on_reading(&mut self, entity_id: &str, reading: Reading, now: Instant) -> Effects {
        if self.is_misconfigured() {
            return Effects::default();
        }

        let mut effects = Effects::default();
        let mut sensor_changed = false;

        if entity_id == self.config.open_sensor {
            self.open = reading;
            sensor_changed = true;
        }
        if entity_id == self.config.closed_sensor {
            self.closed = reading;
            sensor_changed = true;
        }
        if sensor_changed {
            debug!(
                "[{}] Sensor {} -> {} (open={}, closed={})",
                self.id, entity_id, reading, self.open, self.closed
            );
            effects = effects.then(self.refresh(now));
        }

        if entity_id == self.config.toggle_entity {
            let previous = std::mem::replace(&mut self.toggle, reading);
            // Only a real on/off transition counts as a toggle; going to or
            // coming back from unavailable does not move the door.
            if let (Some(before), Some(after)) = (previous.as_bool(), reading.as_bool()) {
                if before != after {
                    debug!("[{}] Toggle entity {} -> {}", self.id, entity_id, reading);
                    effects = effects.then(self.record_toggle(now));
                }
            }
        }

        effects
    }

    /// Handle a cover command at `now`.
    pub fn command(&mut self, command: CoverCommand, now: Instant) -> CommandOutcome {
        if let Health::Misconfigured { missing } = &self.health {
            return CommandOutcome {
                effects: Effects::default(),
                rejection: Some(Rejection::Misconfigured {
                    missing: missing.clone(),
                }),
            };
        }

        let effects = self.refresh(now);
        let state = self.state(now);
        let allowed = match command {
            CoverCommand::Open => state == DoorState::Closed,
            CoverCommand::Close => state == DoorState::Open,
            // The relay cannot tell stop from toggle, so stop always fires.
            CoverCommand::Stop => true,
        };
        if !allowed {
            return CommandOutcome {
                effects,
                rejection: Some(Rejection::InvalidState { command, state }),
            };
        }

        let Some(domain) = ToggleDomain::from_entity_id(&self.config.toggle_entity) else {
            return CommandOutcome {
                effects,
                rejection: Some(Rejection::UnsupportedDomain {
                    entity_id: self.config.toggle_entity.clone(),
                }),
            };
        };

        debug!("[{}] {} accepted while {}", self.id, command, state);
        let toggled = Effects {
            toggle: Some(ToggleAction {
                entity_id: self.config.toggle_entity.clone(),
                domain,
            }),
            ..self.record_toggle(now)
        };

        CommandOutcome {
            effects: effects.then(toggled),
            rejection: None,
        }
    }

    /// Record a toggle at `now`, recompute and ask for a recheck once the
    /// opening window has passed.
    fn record_toggle(&mut self, now: Instant) -> Effects {
        self.last_toggle = Some(now);
        Effects {
            publish: self.publish_if_changed(now),
            toggle: None,
            // An opening window past the clock's range never elapses.
            recheck_at: now.checked_add(self.config.opening_duration),
        }
    }

    fn publish_if_changed(&mut self, now: Instant) -> Option<Publication> {
        let publication = Publication {
            state: self.state(now),
            available: !self.is_misconfigured(),
        };
        if self.published == Some(publication) {
            return None;
        }
        debug!(
            "[{}] State {} -> {} (available={})",
            self.id,
            self.published
                .map(|p| p.state.to_string())
                .unwrap_or_else(|| "none".to_string()),
            publication.state,
            publication.available
        );
        self.published = Some(publication);
        Some(publication)
    }
}
